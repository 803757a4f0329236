//! Obtention de l'URL du relais
//!
//! Le provisionnement (création de l'environnement distant, démarrage du
//! relais, vérification de santé) est fait par un service externe. La session
//! ne voit qu'un appel asynchrone, potentiellement lent, qui retourne une URL
//! WebSocket ou échoue avec `ProvisionFailed`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};

use crate::{SessionError, SessionResult};

/// Collaborateur fournissant l'adresse du relais
#[async_trait]
pub trait RelayProvisioner: Send + Sync {
    /// Retourne une URL `ws://` ou `wss://` joignable
    ///
    /// # Erreurs
    /// - `SessionError::ProvisionFailed` : le relais n'a pas pu être obtenu
    async fn obtain_relay_endpoint(&self) -> SessionResult<String>;
}

/// Relais déjà connu : aucun provisionnement
#[derive(Clone, Debug)]
pub struct StaticRelayEndpoint {
    url: String,
}

impl StaticRelayEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl RelayProvisioner for StaticRelayEndpoint {
    async fn obtain_relay_endpoint(&self) -> SessionResult<String> {
        Ok(self.url.clone())
    }
}

/// Réponse du service de provisionnement
///
/// Succès : `{ "socketUrl": "wss://…/realtime" }`, échec : `{ "error": "…" }`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProvisionResponse {
    socket_url: Option<String>,
    error: Option<String>,
}

/// Interprète la réponse HTTP du service de provisionnement
fn parse_provision_response(status: StatusCode, body: &str) -> SessionResult<String> {
    let parsed: Option<ProvisionResponse> = serde_json::from_str(body).ok();

    if let Some(error) = parsed.as_ref().and_then(|r| r.error.clone()) {
        return Err(SessionError::ProvisionFailed(error));
    }

    if !status.is_success() {
        return Err(SessionError::ProvisionFailed(format!("HTTP {}", status)));
    }

    parsed
        .and_then(|r| r.socket_url)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| SessionError::ProvisionFailed("réponse sans socketUrl".to_string()))
}

/// Client HTTP du service de provisionnement
///
/// Fait un `POST` sans corps sur l'URL configurée et lit `socketUrl`.
#[derive(Clone, Debug)]
pub struct HttpRelayProvisioner {
    client: Client,
    endpoint: String,
}

impl HttpRelayProvisioner {
    /// Le service crée un environnement distant : l'appel peut prendre plusieurs minutes
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_timeout(endpoint, Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RelayProvisioner for HttpRelayProvisioner {
    async fn obtain_relay_endpoint(&self) -> SessionResult<String> {
        info!("🛠️  Provisionnement du relais via {}", self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .send()
            .await
            .map_err(|e| SessionError::ProvisionFailed(format!("requête impossible: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SessionError::ProvisionFailed(format!("réponse illisible: {}", e)))?;

        debug!("Réponse du provisionnement: {} ({} bytes)", status, body.len());

        let url = parse_provision_response(status, &body)?;
        info!("✅ Relais obtenu: {}", url);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_success() {
        let url = parse_provision_response(StatusCode::OK, r#"{"socketUrl":"wss://sb-1.example/realtime"}"#).unwrap();
        assert_eq!(url, "wss://sb-1.example/realtime");
    }

    #[test]
    fn test_parse_error_body() {
        let result = parse_provision_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"error":"Failed to create sandbox"}"#,
        );
        match result {
            Err(SessionError::ProvisionFailed(reason)) => assert_eq!(reason, "Failed to create sandbox"),
            other => panic!("Résultat inattendu: {:?}", other),
        }
    }

    #[test]
    fn test_parse_bad_status_without_body() {
        let result = parse_provision_response(StatusCode::BAD_GATEWAY, "<html>");
        assert!(matches!(result, Err(SessionError::ProvisionFailed(reason)) if reason.contains("502")));
    }

    #[test]
    fn test_parse_missing_socket_url() {
        let result = parse_provision_response(StatusCode::OK, "{}");
        assert!(matches!(result, Err(SessionError::ProvisionFailed(_))));
    }

    #[tokio::test]
    async fn test_static_endpoint() {
        let provisioner = StaticRelayEndpoint::new("wss://example/relay");
        assert_eq!(provisioner.obtain_relay_endpoint().await.unwrap(), "wss://example/relay");
    }

    #[tokio::test]
    async fn test_unreachable_provisioner_fails() {
        // Port 9 (discard) fermé en local : la connexion est refusée immédiatement
        let provisioner = HttpRelayProvisioner::with_timeout("http://127.0.0.1:9/api/v1/realtime", Duration::from_secs(2));
        let result = provisioner.obtain_relay_endpoint().await;
        assert!(matches!(result, Err(SessionError::ProvisionFailed(_))));
    }
}
