//! Crate network - Connexion WebSocket vers le relais vocal
//!
//! Ce crate fournit le transport des messages JSON entre le client et le
//! relais : ouverture avec timeout, envoi des frames micro, réception des
//! réponses audio et des erreurs du service.
//!
//! # Architecture
//!
//! Le crate est organisé en plusieurs modules :
//!
//! - `error` : Gestion d'erreurs avec types spécialisés réseau
//! - `types` : Types de données (messages, états, configuration, statistiques)
//! - `traits` : Traits abstraits pour transport et connecteur
//! - `transport` : Implémentations WebSocket (réel et simulé)
//!
//! # Examples
//!
//! ## Client basique
//!
//! ```rust,no_run
//! use network::{connect, NetworkConfig, TransportEvent, WebSocketConnector, WireMessage};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = NetworkConfig::default();
//! let mut transport = connect(&WebSocketConnector, "wss://example/relay", &config).await?;
//!
//! // Envoie de l'audio
//! // transport.send(&WireMessage::audio_chunk(&pcm)).await?;
//!
//! // Reçoit les réponses
//! if let TransportEvent::Message(WireMessage::AudioDelta { delta }) = transport.recv().await {
//!     println!("{} caractères base64 reçus", delta.len());
//! }
//!
//! transport.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Tests et simulation
//!
//! ```rust
//! use network::{connect, NetworkConfig, SimulatedConnector};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Relais en mémoire (sans vrai réseau)
//! let (connector, relay) = SimulatedConnector::new();
//! let transport = connect(&connector, "wss://example/relay", &NetworkConfig::test_config()).await?;
//!
//! relay.push_text(r#"{"type":"error","error":{"message":"boom"}}"#);
//! # Ok(())
//! # }
//! ```

// Modules internes
mod error;
mod types;
mod traits;
mod transport;

// Re-exports publics
pub use error::{NetworkError, NetworkResult};

pub use types::{ConnectionState, NetworkConfig, ServiceError, TransportStats, WireMessage};

pub use traits::{Connector, Transport, TransportEvent};

pub use transport::{
    ConnectBehavior, RelayHandle, SimulatedConnector, SimulatedTransport, WebSocketConnector, WebSocketTransport,
    connect, validate_relay_url,
};
