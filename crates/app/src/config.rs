// Configuration du client voice-relay
//
// Fichier TOML optionnel, complété ensuite par les options de ligne de commande :
//
// ```toml
// [audio]
// frame_size = 4096
//
// [network]
// connect_timeout_ms = 10000
//
// [relay]
// provision_url = "http://localhost:3000/api/v1/realtime"
// ```

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use audio::AudioConfig;
use network::NetworkConfig;
use serde::{Deserialize, Serialize};
use session::{HttpRelayProvisioner, RelayProvisioner, SessionConfig, StaticRelayEndpoint};

/// Où trouver le relais
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Service qui provisionne un relais et retourne son `socketUrl`
    pub provision_url: Option<String>,

    /// Relais déjà démarré : prioritaire sur `provision_url`
    pub relay_url: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub network: NetworkConfig,
    pub relay: RelayConfig,
}

impl AppConfig {
    /// Charge le fichier s'il est fourni, sinon la configuration par défaut
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("lecture de {} impossible", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("configuration invalide dans {}", path.display()))?;

        tracing::info!(path = %path.display(), "configuration chargée");
        Ok(config)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Applique les options de ligne de commande (non vides)
    pub fn apply_overrides(&mut self, relay_url: Option<String>, provision_url: Option<String>) {
        if let Some(url) = relay_url.filter(|url| !url.is_empty()) {
            self.relay.relay_url = Some(url);
        }
        if let Some(url) = provision_url.filter(|url| !url.is_empty()) {
            self.relay.provision_url = Some(url);
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            audio: self.audio.clone(),
            network: self.network.clone(),
        }
    }

    /// Choisit le collaborateur de provisionnement
    pub fn provisioner(&self) -> anyhow::Result<Arc<dyn RelayProvisioner>> {
        if let Some(url) = &self.relay.relay_url {
            network::validate_relay_url(url)?;
            return Ok(Arc::new(StaticRelayEndpoint::new(url.clone())));
        }
        if let Some(url) = &self.relay.provision_url {
            let provisioner = HttpRelayProvisioner::new(url.clone());
            tracing::info!(endpoint = provisioner.endpoint(), "provisionnement HTTP du relais");
            return Ok(Arc::new(provisioner));
        }
        bail!("aucun relais configuré : utiliser --relay-url ou --provision-url")
    }
}
