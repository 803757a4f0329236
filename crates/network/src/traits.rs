//! Traits abstraits pour le système networking
//!
//! Ce module définit les interfaces (traits) que doivent implémenter
//! les transports. Cela permet d'avoir du code modulaire
//! et testable avec différentes implémentations.

use async_trait::async_trait;

use crate::{ConnectionState, NetworkConfig, NetworkResult, TransportStats, WireMessage};

/// Événement remonté par un transport
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    /// Message reçu du relais, dans l'ordre d'arrivée
    Message(WireMessage),

    /// Connexion terminée. `error` distingue une coupure sur erreur d'une
    /// fermeture normale par le relais.
    Closed { reason: String, error: bool },
}

/// Trait pour une connexion ouverte vers le relais
///
/// Ce trait abstrait permet d'utiliser différentes implémentations :
/// - WebSocketTransport : connexion réelle avec tokio-tungstenite
/// - SimulatedTransport : relais en mémoire pour les tests
///
/// `#[async_trait]` permet d'avoir des fonctions async dans les traits.
#[async_trait]
pub trait Transport: Send {
    /// Envoie un message, uniquement si la connexion est ouverte
    ///
    /// # Erreurs
    /// - `NetworkError::NotConnected` : connexion pas (ou plus) ouverte
    /// - `NetworkError::WebSocket` : écriture impossible
    async fn send(&mut self, message: &WireMessage) -> NetworkResult<()>;

    /// Attend le prochain événement entrant
    ///
    /// Annulable sans perte : peut être utilisé dans un `tokio::select!`.
    /// Après `Closed`, chaque appel renvoie de nouveau `Closed`.
    async fn recv(&mut self) -> TransportEvent;

    /// Ferme la connexion. Idempotent.
    async fn close(&mut self);

    /// Retourne l'état de connexion actuel
    fn state(&self) -> ConnectionState;

    /// Retourne les statistiques de trafic
    fn stats(&self) -> TransportStats;
}

/// Trait pour ouvrir des connexions vers une URL de relais
#[async_trait]
pub trait Connector: Send + Sync {
    /// Ouvre une connexion ; ne retourne qu'une fois la connexion établie
    ///
    /// Le timeout est appliqué par `connect`, pas par le connecteur.
    async fn open(&self, url: &str, config: &NetworkConfig) -> NetworkResult<Box<dyn Transport>>;
}
