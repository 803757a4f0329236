//! Configuration audio pour le pipeline voix temps réel
//!
//! Ce module définit tous les paramètres audio utilisés par l'application.
//! Le service distant attend du PCM16 mono à 24 kHz : ces valeurs ne sont
//! pas de simples préférences, elles font partie du contrat du fil.

use serde::{Deserialize, Serialize};

use crate::{AudioError, AudioResult};

/// Fréquence d'échantillonnage imposée par le service distant (Hz)
pub const SAMPLE_RATE: u32 = 24_000;

/// Nombre d'échantillons par frame de capture
pub const FRAME_SIZE: usize = 4096;

/// Configuration principale pour tout le système audio
///
/// Cette structure contient tous les paramètres nécessaires pour configurer :
/// - La capture audio (microphone) et le découpage en frames
/// - La conversion PCM16
/// - La lecture planifiée (haut-parleurs)
///
/// `#[serde(default)]` permet de ne préciser que les champs modifiés
/// dans un fichier de configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Fréquence d'échantillonnage en Hz (échantillons par seconde)
    ///
    /// 24000 Hz = format attendu par le service vocal
    pub sample_rate: u32,

    /// Nombre de canaux audio
    ///
    /// Seul le mono (1) est supporté
    pub channels: u16,

    /// Nombre d'échantillons accumulés avant d'envoyer une frame
    ///
    /// 4096 échantillons à 24 kHz = ~170ms d'audio par message
    pub frame_size: usize,

    /// Demande l'annulation d'écho au périphérique de capture
    pub echo_cancellation: bool,

    /// Demande la suppression de bruit au périphérique de capture
    pub noise_suppression: bool,

    /// Demande le contrôle automatique de gain au périphérique de capture
    pub auto_gain_control: bool,

    /// Profondeur de la file capture → contexte de contrôle (en frames)
    ///
    /// Si la file est pleine, le callback temps réel jette la frame
    /// plutôt que de bloquer.
    pub frame_channel_capacity: usize,

    /// Profondeur de la file de commandes vers le callback de sortie
    pub output_queue_capacity: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,       // 24 kHz - format du service
            channels: 1,                    // Mono uniquement
            frame_size: FRAME_SIZE,         // 4096 échantillons par message
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            frame_channel_capacity: 32,     // ~5s d'audio en attente max
            output_queue_capacity: 256,
        }
    }
}

impl AudioConfig {
    /// Durée d'une frame de capture en secondes
    ///
    /// Exemple : 4096 / 24000 = ~0.1707s
    pub fn frame_duration_secs(&self) -> f64 {
        self.frame_size as f64 / self.sample_rate as f64
    }

    /// Taille en bytes d'une frame une fois convertie en PCM16
    ///
    /// Chaque échantillon = i16 = 2 bytes
    pub fn pcm16_frame_bytes(&self) -> usize {
        self.frame_size * self.channels as usize * 2
    }

    /// Valide que la configuration est cohérente
    pub fn validate(&self) -> AudioResult<()> {
        if self.sample_rate < 8000 || self.sample_rate > 48000 {
            return Err(AudioError::ConfigError(format!(
                "Sample rate invalide: {} (doit être entre 8000 et 48000)",
                self.sample_rate
            )));
        }

        if self.channels != 1 {
            return Err(AudioError::ConfigError(format!(
                "Nombre de canaux invalide: {} (seul le mono est supporté)",
                self.channels
            )));
        }

        if self.frame_size == 0 {
            return Err(AudioError::ConfigError("Taille de frame nulle".to_string()));
        }

        if self.frame_channel_capacity == 0 || self.output_queue_capacity == 0 {
            return Err(AudioError::ConfigError(
                "Les files audio doivent avoir une capacité non nulle".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AudioConfig::default();

        assert_eq!(config.sample_rate, 24_000);
        assert_eq!(config.frame_size, 4096);
        assert_eq!(config.pcm16_frame_bytes(), 8192); // 4096 * 1 * 2
        assert!((config.frame_duration_secs() - 4096.0 / 24000.0).abs() < 1e-12);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let mut config = AudioConfig::default();

        config.sample_rate = 1000; // Trop bas
        assert!(config.validate().is_err());

        config.sample_rate = SAMPLE_RATE;
        config.channels = 2; // Stéréo non supporté
        assert!(matches!(config.validate(), Err(AudioError::ConfigError(_))));

        config.channels = 1;
        config.frame_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_deserialization() {
        // Les champs absents prennent la valeur par défaut
        let config: AudioConfig = serde_json::from_str(r#"{"frame_size": 1024}"#)
            .expect("config partielle");

        assert_eq!(config.frame_size, 1024);
        assert_eq!(config.sample_rate, SAMPLE_RATE);
        assert!(config.echo_cancellation);
    }
}
