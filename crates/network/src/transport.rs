//! Transport WebSocket vers le relais
//!
//! Ce module implémente la connexion bas niveau utilisant tokio-tungstenite.
//! Une tâche de lecture dédiée parse chaque message texte et le range dans
//! une file bornée ; l'écriture reste sur le transport lui-même.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::{
    ConnectionState, Connector, NetworkConfig, NetworkError, NetworkResult, Transport, TransportEvent,
    TransportStats, WireMessage,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Délai laissé au relais pour acquitter la fermeture
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Compteurs partagés entre le transport et sa tâche de lecture
#[derive(Default)]
struct TrafficCounters {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl TrafficCounters {
    fn record_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn record_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TransportStats {
        TransportStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}

/// Vérifie qu'une URL désigne bien un relais WebSocket
pub fn validate_relay_url(url: &str) -> NetworkResult<()> {
    let rest = url
        .strip_prefix("wss://")
        .or_else(|| url.strip_prefix("ws://"))
        .ok_or_else(|| NetworkError::InvalidUrl { url: url.to_string() })?;

    if rest.is_empty() || rest.starts_with('/') {
        return Err(NetworkError::InvalidUrl { url: url.to_string() });
    }
    Ok(())
}

/// Ouvre une connexion avec timeout
///
/// Si le délai expire, la tentative en cours est abandonnée (la connexion à
/// moitié ouverte est libérée avec le futur) et `ConnectionTimeout` est retourné.
///
/// # Example
/// ```rust,no_run
/// use network::{connect, NetworkConfig, WebSocketConnector};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = connect(&WebSocketConnector, "wss://example/relay", &NetworkConfig::default()).await?;
/// println!("État: {}", transport.state().description());
/// # Ok(())
/// # }
/// ```
pub async fn connect(
    connector: &dyn Connector,
    url: &str,
    config: &NetworkConfig,
) -> NetworkResult<Box<dyn Transport>> {
    config.validate()?;
    validate_relay_url(url)?;

    debug!("Connexion à {} (timeout {}ms)", url, config.connect_timeout_ms);

    match timeout(config.connect_timeout(), connector.open(url, config)).await {
        Ok(result) => result,
        Err(_) => {
            warn!("⏱️  Timeout de connexion vers {}", url);
            Err(NetworkError::connection_timeout(url, config.connect_timeout_ms))
        }
    }
}

/// Transport WebSocket réel
pub struct WebSocketTransport {
    /// Moitié écriture de la connexion
    sink: SplitSink<WsStream, Message>,

    /// Événements parsés par la tâche de lecture
    inbound: mpsc::Receiver<TransportEvent>,

    /// Tâche de lecture (annulée à la fermeture)
    reader: JoinHandle<()>,

    open: Arc<AtomicBool>,
    counters: Arc<TrafficCounters>,
    closed_locally: bool,
    last_close: Option<TransportEvent>,
}

impl WebSocketTransport {
    /// Prend possession d'une connexion déjà établie
    pub fn from_stream(stream: WsStream, config: &NetworkConfig) -> Self {
        let (sink, source) = stream.split();
        let (tx, rx) = mpsc::channel(config.inbound_capacity.max(1));
        let open = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(TrafficCounters::default());

        let reader = tokio::spawn(Self::read_loop(source, tx, Arc::clone(&open), Arc::clone(&counters)));

        Self {
            sink,
            inbound: rx,
            reader,
            open,
            counters,
            closed_locally: false,
            last_close: None,
        }
    }

    /// Boucle de lecture : un événement par message texte, puis `Closed`
    async fn read_loop(
        mut source: SplitStream<WsStream>,
        events: mpsc::Sender<TransportEvent>,
        open: Arc<AtomicBool>,
        counters: Arc<TrafficCounters>,
    ) {
        let closed = loop {
            match source.next().await {
                Some(Ok(Message::Text(text))) => {
                    counters.record_received(text.len());
                    let message = WireMessage::parse(&text);
                    if events.send(TransportEvent::Message(message)).await.is_err() {
                        // Transport abandonné, plus personne n'écoute
                        open.store(false, Ordering::Release);
                        return;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "fermeture par le relais".to_string());
                    break TransportEvent::Closed { reason, error: false };
                }
                Some(Ok(Message::Binary(data))) => {
                    debug!("Message binaire ignoré ({} bytes)", data.len());
                }
                Some(Ok(_)) => {} // Ping/Pong gérés par tungstenite
                Some(Err(e)) => {
                    break TransportEvent::Closed {
                        reason: e.to_string(),
                        error: true,
                    };
                }
                None => {
                    break TransportEvent::Closed {
                        reason: "connexion terminée".to_string(),
                        error: false,
                    };
                }
            }
        };

        open.store(false, Ordering::Release);
        let _ = events.send(closed).await;
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: &WireMessage) -> NetworkResult<()> {
        if !self.open.load(Ordering::Acquire) {
            return Err(NetworkError::NotConnected);
        }

        let text = message.to_json()?;
        let bytes = text.len();

        self.sink.send(Message::Text(text)).await?;

        self.counters.record_sent(bytes);
        Ok(())
    }

    async fn recv(&mut self) -> TransportEvent {
        if let Some(closed) = &self.last_close {
            return closed.clone();
        }

        let event = self.inbound.recv().await.unwrap_or_else(|| TransportEvent::Closed {
            reason: "transport fermé".to_string(),
            error: false,
        });

        if matches!(event, TransportEvent::Closed { .. }) {
            self.last_close = Some(event.clone());
        }
        event
    }

    async fn close(&mut self) {
        if self.closed_locally {
            return;
        }
        self.closed_locally = true;
        self.open.store(false, Ordering::Release);

        // Envoie la trame de fermeture, sans attendre indéfiniment le relais
        if timeout(CLOSE_GRACE, self.sink.close()).await.is_err() {
            debug!("Le relais n'a pas acquitté la fermeture");
        }
        self.reader.abort();

        info!("🔌 Connexion au relais fermée");
    }

    fn state(&self) -> ConnectionState {
        if self.open.load(Ordering::Acquire) {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    fn stats(&self) -> TransportStats {
        self.counters.snapshot()
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Connecteur WebSocket réel (ws:// et wss://)
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, url: &str, config: &NetworkConfig) -> NetworkResult<Box<dyn Transport>> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| NetworkError::connect_failed(url, e))?;

        info!("🔗 Connecté au relais {}", url);
        Ok(Box::new(WebSocketTransport::from_stream(stream, config)))
    }
}

/// Comportement du relais simulé à la prochaine ouverture
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectBehavior {
    /// La connexion s'ouvre immédiatement
    Accept,

    /// La connexion est refusée avec ce motif
    Refuse(String),

    /// La connexion ne s'ouvre jamais (pour tester le timeout)
    Hang,
}

/// Côté relais d'une connexion simulée
struct RelayLink {
    to_client: mpsc::UnboundedSender<TransportEvent>,
    open: Arc<AtomicBool>,
}

struct RelayShared {
    behavior: ConnectBehavior,
    link: Option<RelayLink>,
    sent: Vec<WireMessage>,
    connections: u32,
    local_closes: u32,
}

fn lock_shared(shared: &Mutex<RelayShared>) -> MutexGuard<'_, RelayShared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Connecteur en mémoire pour les tests
///
/// Chaque ouverture crée un `SimulatedTransport` relié au `RelayHandle`.
#[derive(Clone)]
pub struct SimulatedConnector {
    shared: Arc<Mutex<RelayShared>>,
}

/// Poignée de test jouant le rôle du relais
#[derive(Clone)]
pub struct RelayHandle {
    shared: Arc<Mutex<RelayShared>>,
}

impl SimulatedConnector {
    pub fn new() -> (Self, RelayHandle) {
        let shared = Arc::new(Mutex::new(RelayShared {
            behavior: ConnectBehavior::Accept,
            link: None,
            sent: Vec::new(),
            connections: 0,
            local_closes: 0,
        }));

        (
            Self {
                shared: Arc::clone(&shared),
            },
            RelayHandle { shared },
        )
    }
}

#[async_trait]
impl Connector for SimulatedConnector {
    async fn open(&self, url: &str, _config: &NetworkConfig) -> NetworkResult<Box<dyn Transport>> {
        let behavior = lock_shared(&self.shared).behavior.clone();

        match behavior {
            ConnectBehavior::Accept => {}
            ConnectBehavior::Refuse(reason) => return Err(NetworkError::connect_failed(url, reason)),
            ConnectBehavior::Hang => std::future::pending::<()>().await,
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        let mut shared = lock_shared(&self.shared);
        shared.connections += 1;
        shared.link = Some(RelayLink {
            to_client: tx,
            open: Arc::clone(&open),
        });

        debug!("Connexion simulée vers {}", url);
        Ok(Box::new(SimulatedTransport {
            shared: Arc::clone(&self.shared),
            inbound: rx,
            open,
            counters: TrafficCounters::default(),
            closed_locally: false,
            last_close: None,
        }))
    }
}

/// Transport en mémoire, piloté par un `RelayHandle`
pub struct SimulatedTransport {
    shared: Arc<Mutex<RelayShared>>,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    open: Arc<AtomicBool>,
    counters: TrafficCounters,
    closed_locally: bool,
    last_close: Option<TransportEvent>,
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn send(&mut self, message: &WireMessage) -> NetworkResult<()> {
        if !self.open.load(Ordering::Acquire) {
            return Err(NetworkError::NotConnected);
        }

        let text = message.to_json()?;
        self.counters.record_sent(text.len());
        lock_shared(&self.shared).sent.push(message.clone());
        Ok(())
    }

    async fn recv(&mut self) -> TransportEvent {
        if let Some(closed) = &self.last_close {
            return closed.clone();
        }

        let event = self.inbound.recv().await.unwrap_or_else(|| TransportEvent::Closed {
            reason: "relais simulé détruit".to_string(),
            error: false,
        });

        match &event {
            TransportEvent::Message(message) => {
                let bytes = message.to_json().map(|text| text.len()).unwrap_or(0);
                self.counters.record_received(bytes);
            }
            TransportEvent::Closed { .. } => {
                self.open.store(false, Ordering::Release);
                self.last_close = Some(event.clone());
            }
        }
        event
    }

    async fn close(&mut self) {
        if self.closed_locally {
            return;
        }
        self.closed_locally = true;
        self.open.store(false, Ordering::Release);
        lock_shared(&self.shared).local_closes += 1;
    }

    fn state(&self) -> ConnectionState {
        if self.open.load(Ordering::Acquire) {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    fn stats(&self) -> TransportStats {
        self.counters.snapshot()
    }
}

impl RelayHandle {
    /// Change le comportement des prochaines ouvertures
    pub fn set_behavior(&self, behavior: ConnectBehavior) {
        lock_shared(&self.shared).behavior = behavior;
    }

    /// Envoie un message texte brut au client, comme sur le fil
    ///
    /// Retourne `false` s'il n'y a pas de connexion ouverte.
    pub fn push_text(&self, raw: &str) -> bool {
        self.push(WireMessage::parse(raw))
    }

    /// Envoie un message déjà construit au client
    pub fn push(&self, message: WireMessage) -> bool {
        self.deliver(TransportEvent::Message(message), false)
    }

    /// Ferme la connexion côté relais
    pub fn close_remote(&self, reason: &str) -> bool {
        self.deliver(
            TransportEvent::Closed {
                reason: reason.to_string(),
                error: false,
            },
            true,
        )
    }

    /// Coupe la connexion sur une erreur réseau
    pub fn fail(&self, reason: &str) -> bool {
        self.deliver(
            TransportEvent::Closed {
                reason: reason.to_string(),
                error: true,
            },
            true,
        )
    }

    fn deliver(&self, event: TransportEvent, closing: bool) -> bool {
        let shared = lock_shared(&self.shared);
        match &shared.link {
            Some(link) if link.open.load(Ordering::Acquire) => {
                if closing {
                    link.open.store(false, Ordering::Release);
                }
                link.to_client.send(event).is_ok()
            }
            _ => false,
        }
    }

    /// Messages reçus par le relais, dans l'ordre d'envoi
    pub fn sent(&self) -> Vec<WireMessage> {
        lock_shared(&self.shared).sent.clone()
    }

    /// Nombre de connexions ouvertes depuis la création
    pub fn connections(&self) -> u32 {
        lock_shared(&self.shared).connections
    }

    /// Nombre de fermetures demandées par le client
    pub fn local_closes(&self) -> u32 {
        lock_shared(&self.shared).local_closes
    }

    /// La connexion courante est-elle ouverte ?
    pub fn is_open(&self) -> bool {
        lock_shared(&self.shared)
            .link
            .as_ref()
            .map(|link| link.open.load(Ordering::Acquire))
            .unwrap_or(false)
    }
}
