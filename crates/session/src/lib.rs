//! Crate session - Contrôle de la session vocale temps réel
//!
//! Ce crate coordonne le pipeline complet :
//! - `provisioning` : obtention de l'URL du relais (HTTP ou statique)
//! - `controller` : machine à états, capture → relais → lecture
//! - `state` : états et compteurs exposés pour l'affichage
//! - `config` : configuration audio + réseau
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use audio::{CpalCapture, CpalOutputFactory};
//! use network::WebSocketConnector;
//! use session::{SessionConfig, SessionController, StaticRelayEndpoint};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig::default();
//! let capture = CpalCapture::new(config.audio.clone())?;
//!
//! let mut controller = SessionController::new(
//!     config,
//!     Arc::new(StaticRelayEndpoint::new("wss://example/relay")),
//!     Arc::new(WebSocketConnector),
//!     Box::new(capture),
//!     Arc::new(CpalOutputFactory),
//! );
//!
//! controller.start_capture().await?;
//! println!("{}", controller.state());
//! controller.close().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod controller;
mod error;
mod provisioning;
mod state;

pub use config::SessionConfig;
pub use controller::{SessionController, SessionEvent};
pub use error::{SessionError, SessionResult};
pub use provisioning::{HttpRelayProvisioner, RelayProvisioner, StaticRelayEndpoint};
pub use state::{SessionState, SessionStats};
