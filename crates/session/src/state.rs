//! États et compteurs de la session vocale

use std::fmt;

/// État de la session, exposé pour l'affichage
///
/// ```text
/// Idle → Connecting → Connected ⇄ Capturing
///                         ↓
///                   Disconnected
/// ```
/// Tout état peut passer à `Failed(raison)`. `Failed` et `Disconnected`
/// sont terminaux jusqu'au prochain `connect`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Capturing,
    Disconnected,
    Failed(String),
}

impl SessionState {
    /// La connexion au relais est ouverte
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected | SessionState::Capturing)
    }

    /// Un `connect` est nécessaire pour repartir
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Disconnected | SessionState::Failed(_))
    }

    /// Retourne une description textuelle de l'état
    pub fn description(&self) -> String {
        match self {
            SessionState::Idle => "Inactif".to_string(),
            SessionState::Connecting => "Connexion en cours".to_string(),
            SessionState::Connected => "Connecté".to_string(),
            SessionState::Capturing => "Enregistrement".to_string(),
            SessionState::Disconnected => "Déconnecté".to_string(),
            SessionState::Failed(reason) => format!("Échec: {}", reason),
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

/// Compteurs de la session pour l'affichage du statut
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Frames micro envoyées au relais
    pub frames_sent: u64,

    /// Frames perdues (file pleine, ou transport fermé au moment de l'envoi)
    pub frames_dropped: u64,

    /// Réponses audio reçues
    pub deltas_received: u64,

    /// Réponses audio rejetées au décodage
    pub malformed_payloads: u64,

    /// Messages entrants non reconnus
    pub unrecognized_messages: u64,

    /// Erreurs signalées par le service
    pub service_errors: u64,
}
