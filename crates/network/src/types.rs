//! Types de données pour le système networking
//!
//! Ce module définit les structures principales pour la communication avec le relais :
//! - WireMessage : messages JSON échangés sur la connexion
//! - ConnectionState : états de la connexion
//! - NetworkConfig : configuration du système réseau
//! - TransportStats : compteurs de trafic

use serde::{Deserialize, Serialize};
use std::time::Duration;

use audio::{Pcm16Buffer, codec};

use crate::NetworkResult;

/// Détail d'une erreur signalée par le service
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceError {
    #[serde(default)]
    pub message: String,
}

/// Message échangé avec le relais
///
/// Chaque message est un objet JSON dont le champ `type` donne la variante.
/// Tout ce qui n'est pas reconnu (JSON invalide, type inconnu, champ manquant)
/// devient `Unrecognized` : jamais une erreur fatale pour la session.
///
/// # Example
/// ```rust
/// use network::WireMessage;
///
/// let message = WireMessage::parse(r#"{"type":"response.audio.delta","delta":"AQACAA=="}"#);
/// assert_eq!(message.message_type(), "response.audio.delta");
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    /// Frame micro envoyée au service (PCM16 en base64)
    #[serde(rename = "input_audio_buffer.append")]
    AudioAppend { audio: String },

    /// Morceau de réponse audio du service (PCM16 en base64)
    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: String },

    /// Erreur signalée par le service, la connexion reste ouverte
    #[serde(rename = "error")]
    ErrorNotice { error: ServiceError },

    /// Message entrant non reconnu, conservé tel quel pour debug
    #[serde(skip)]
    Unrecognized { raw: String },
}

impl WireMessage {
    /// Construit le message d'envoi d'une frame micro
    pub fn audio_chunk(pcm: &Pcm16Buffer) -> Self {
        WireMessage::AudioAppend {
            audio: codec::encode(pcm),
        }
    }

    /// Construit une notification d'erreur (utile côté relais simulé)
    pub fn error_notice(message: impl Into<String>) -> Self {
        WireMessage::ErrorNotice {
            error: ServiceError {
                message: message.into(),
            },
        }
    }

    /// Parse un message texte reçu
    pub fn parse(text: &str) -> Self {
        serde_json::from_str(text).unwrap_or_else(|_| WireMessage::Unrecognized {
            raw: text.to_string(),
        })
    }

    /// Sérialise le message pour l'envoi
    ///
    /// Un message `Unrecognized` est renvoyé tel qu'il a été reçu.
    pub fn to_json(&self) -> NetworkResult<String> {
        match self {
            WireMessage::Unrecognized { raw } => Ok(raw.clone()),
            other => Ok(serde_json::to_string(other)?),
        }
    }

    /// Valeur du champ `type` pour les logs
    pub fn message_type(&self) -> &'static str {
        match self {
            WireMessage::AudioAppend { .. } => "input_audio_buffer.append",
            WireMessage::AudioDelta { .. } => "response.audio.delta",
            WireMessage::ErrorNotice { .. } => "error",
            WireMessage::Unrecognized { .. } => "inconnu",
        }
    }
}

/// États possibles de la connexion au relais
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Ouverture en cours
    Connecting,

    /// Connexion établie, envoi possible
    Open,

    /// Connexion fermée (localement ou par le relais)
    Closed,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Retourne une description textuelle de l'état
    pub fn description(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "Connexion en cours",
            ConnectionState::Open => "Connecté",
            ConnectionState::Closed => "Fermé",
        }
    }
}

/// Configuration du système réseau
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Délai maximum pour ouvrir la connexion (millisecondes)
    pub connect_timeout_ms: u64,

    /// Taille de la file des messages entrants
    pub inbound_capacity: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            inbound_capacity: 256,
        }
    }
}

impl NetworkConfig {
    /// Configuration pour les tests (timeouts très courts)
    pub fn test_config() -> Self {
        Self {
            connect_timeout_ms: 50,
            inbound_capacity: 32,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Vérifie la cohérence de la configuration
    pub fn validate(&self) -> NetworkResult<()> {
        if self.connect_timeout_ms == 0 {
            return Err(crate::NetworkError::ConfigError(
                "connect_timeout_ms doit être > 0".to_string(),
            ));
        }
        if self.inbound_capacity == 0 {
            return Err(crate::NetworkError::ConfigError(
                "inbound_capacity doit être > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Statistiques de trafic d'un transport
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}
