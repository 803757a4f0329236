//! Configuration de la session : audio + réseau

use audio::AudioConfig;
use network::NetworkConfig;
use serde::{Deserialize, Serialize};

use crate::{SessionError, SessionResult};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub audio: AudioConfig,
    pub network: NetworkConfig,
}

impl SessionConfig {
    /// Configuration pour les tests (timeouts très courts)
    pub fn test_config() -> Self {
        Self {
            audio: AudioConfig::default(),
            network: NetworkConfig::test_config(),
        }
    }

    pub fn validate(&self) -> SessionResult<()> {
        self.audio.validate().map_err(SessionError::from)?;
        self.network.validate().map_err(SessionError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: SessionConfig = serde_json::from_str(r#"{"network":{"connect_timeout_ms":2000}}"#).unwrap();

        assert_eq!(config.network.connect_timeout_ms, 2000);
        assert_eq!(config.network.inbound_capacity, 256);
        assert_eq!(config.audio, AudioConfig::default());
        assert!(config.validate().is_ok());
    }
}
