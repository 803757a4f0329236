//! Gestion d'erreurs pour le système audio
//!
//! Ce module définit tous les types d'erreurs possibles dans le pipeline audio :
//! capture, conversion PCM16, encodage fil et lecture planifiée.

use thiserror::Error;

/// Énumération de toutes les erreurs possibles dans le système audio
///
/// `thiserror::Error` génère automatiquement l'implémentation du trait Error
/// et nous permet de définir des messages d'erreur avec `#[error("...")]`
#[derive(Error, Debug)]
pub enum AudioError {
    /// Aucun périphérique audio (microphone ou haut-parleurs) n'a été trouvé
    #[error("Aucun périphérique audio trouvé")]
    NoDeviceFound,

    /// Le microphone ne peut pas être acquis (permission refusée, occupé...)
    ///
    /// Aucune frame n'est jamais émise quand `start` échoue avec cette erreur.
    #[error("Capture indisponible: {0}")]
    CaptureUnavailable(String),

    /// Charge utile reçue invalide (base64 incorrect ou longueur impaire)
    #[error("Charge utile audio invalide: {0}")]
    MalformedPayload(String),

    /// Erreur lors de la configuration des paramètres audio (sample rate, etc.)
    #[error("Erreur de configuration audio: {0}")]
    ConfigError(String),

    /// Erreur provenant de la librairie cpal (Cross-Platform Audio Library)
    /// `#[from]` génère automatiquement une conversion depuis l'erreur cpal
    #[error("Erreur cpal: {0}")]
    CpalError(#[from] cpal::PlayStreamError),

    /// La file vers le callback de sortie est pleine - buffer non planifié
    #[error("Buffer overflow - buffer de lecture perdu")]
    BufferOverflow,

    /// Le périphérique audio a été débranché pendant l'utilisation
    #[error("Périphérique audio déconnecté")]
    DeviceDisconnected,
}

/// Conversion des erreurs cpal::BuildStreamError
impl From<cpal::BuildStreamError> for AudioError {
    fn from(err: cpal::BuildStreamError) -> Self {
        AudioError::ConfigError(format!("Erreur construction stream: {:?}", err))
    }
}

/// Conversion des erreurs cpal::DefaultStreamConfigError
impl From<cpal::DefaultStreamConfigError> for AudioError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        AudioError::ConfigError(format!("Erreur config par défaut: {:?}", err))
    }
}

/// Conversion des erreurs cpal::SupportedStreamConfigsError
impl From<cpal::SupportedStreamConfigsError> for AudioError {
    fn from(err: cpal::SupportedStreamConfigsError) -> Self {
        AudioError::ConfigError(format!("Impossible d'obtenir configs supportées: {:?}", err))
    }
}

impl AudioError {
    /// Vérifie si l'erreur concerne uniquement un message isolé
    ///
    /// Ces erreurs sont journalisées puis ignorées, jamais fatales pour la session.
    pub fn is_per_message(&self) -> bool {
        matches!(self, AudioError::MalformedPayload(_) | AudioError::BufferOverflow)
    }
}

/// Type Result personnalisé pour notre crate
///
/// Au lieu d'écrire Result<T, AudioError> partout, on peut écrire AudioResult<T>
pub type AudioResult<T> = Result<T, AudioError>;
