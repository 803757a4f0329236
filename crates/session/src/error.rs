//! Gestion d'erreurs pour la session vocale
//!
//! Les erreurs audio et réseau remontent telles quelles via `#[from]` ;
//! la session ajoute ses propres cas (provisionnement, état invalide).

use audio::AudioError;
use network::NetworkError;
use thiserror::Error;

/// Énumération de toutes les erreurs possibles au niveau session
#[derive(Error, Debug)]
pub enum SessionError {
    /// Le collaborateur de provisionnement n'a pas fourni de relais
    #[error("Provisionnement du relais impossible: {0}")]
    ProvisionFailed(String),

    /// La connexion au relais a été coupée sur une erreur
    #[error("Connexion au relais perdue: {0}")]
    ConnectionLost(String),

    /// Erreur du pipeline audio (micro indisponible, sortie perdue...)
    #[error(transparent)]
    Audio(#[from] AudioError),

    /// Erreur du transport (timeout, connexion refusée...)
    #[error(transparent)]
    Network(#[from] NetworkError),
}

impl SessionError {
    /// Le micro n'a pas pu être acquis : la session reste connectée
    pub fn is_capture_unavailable(&self) -> bool {
        matches!(self, SessionError::Audio(AudioError::CaptureUnavailable(_)))
    }
}

/// Type Result personnalisé pour le crate session
pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = SessionError::ProvisionFailed("Failed to create sandbox".to_string());
        assert_eq!(
            error.to_string(),
            "Provisionnement du relais impossible: Failed to create sandbox"
        );

        let error = SessionError::from(NetworkError::NotConnected);
        assert_eq!(error.to_string(), "Transport non connecté");
    }

    #[test]
    fn test_capture_unavailable_classification() {
        let error = SessionError::from(AudioError::CaptureUnavailable("occupé".to_string()));
        assert!(error.is_capture_unavailable());
        assert!(!SessionError::ProvisionFailed("x".to_string()).is_capture_unavailable());
    }
}
