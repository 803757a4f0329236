//! Gestion d'erreurs pour le système networking
//!
//! Ce module définit tous les types d'erreurs possibles côté transport :
//! ouverture de la connexion WebSocket, envoi, (dé)sérialisation JSON.
//! Il suit les mêmes patterns que le module audio pour la cohérence du code.

use thiserror::Error;

/// Énumération de toutes les erreurs possibles dans le système réseau
///
/// `thiserror::Error` génère automatiquement l'implémentation du trait Error
/// avec des messages d'erreur descriptifs en français.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// L'URL du relais n'est pas une URL WebSocket
    #[error("URL de relais invalide: {url}")]
    InvalidUrl { url: String },

    /// Le relais a refusé la connexion ou est injoignable
    #[error("Connexion vers {url} impossible: {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// La connexion ne s'est pas ouverte dans le délai imparti
    #[error("Timeout de connexion vers {url} après {timeout_ms}ms")]
    ConnectionTimeout { url: String, timeout_ms: u64 },

    /// Opération d'envoi alors que le transport n'est pas ouvert
    #[error("Transport non connecté")]
    NotConnected,

    /// Erreur du protocole WebSocket (écriture, trame invalide...)
    #[error("Erreur WebSocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Erreur lors de la sérialisation des messages
    #[error("Erreur de sérialisation: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Erreur de configuration réseau
    #[error("Configuration réseau invalide: {0}")]
    ConfigError(String),
}

/// Type Result personnalisé pour notre crate network
///
/// Au lieu d'écrire Result<T, NetworkError> partout, on peut écrire NetworkResult<T>
pub type NetworkResult<T> = Result<T, NetworkError>;

/// Fonctions utilitaires pour créer des erreurs communes
impl NetworkError {
    /// Crée une erreur de connexion avec contexte
    pub fn connect_failed(url: &str, cause: impl std::fmt::Display) -> Self {
        Self::ConnectionFailed {
            url: url.to_string(),
            reason: cause.to_string(),
        }
    }

    /// Crée une erreur de timeout avec contexte
    pub fn connection_timeout(url: &str, timeout_ms: u64) -> Self {
        Self::ConnectionTimeout {
            url: url.to_string(),
            timeout_ms,
        }
    }

    /// Vérifie si l'erreur est récupérable (worth retrying)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            NetworkError::ConnectionTimeout { .. } | NetworkError::ConnectionFailed { .. }
        )
    }

    /// Vérifie si l'erreur nécessite une reconnexion
    pub fn requires_reconnection(&self) -> bool {
        matches!(
            self,
            NetworkError::NotConnected | NetworkError::WebSocket(_) | NetworkError::ConnectionTimeout { .. }
        )
    }
}
