//! Contrôleur de session vocale
//!
//! Relie les quatre briques : capture → codec → transport → lecture.
//! Tout s'exécute sur le contexte de contrôle (une seule tâche tokio) :
//! le callback audio ne fait qu'envoyer des `CaptureEvent` dans une file.
//!
//! # Boucle d'événements
//!
//! ```rust,no_run
//! # use session::SessionController;
//! # async fn run(mut controller: SessionController) -> session::SessionResult<()> {
//! controller.start_capture().await?;
//! loop {
//!     let event = controller.next_event().await;
//!     controller.dispatch(event).await?;
//! }
//! # }
//! ```
//!
//! # Ordre de libération
//!
//! Chaque chemin d'arrêt libère, dans cet ordre et une seule fois :
//! micro → file de frames → connexion → (démontage complet seulement) sortie audio.

use std::future::pending;
use std::sync::Arc;

use audio::{
    AudioCapture, CaptureEvent, OutputDevice, OutputFactory, Pcm16Buffer, PlaybackScheduler,
    PlaybackStatus, codec,
};
use network::{ConnectionState, Connector, NetworkError, Transport, TransportEvent, WireMessage};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{RelayProvisioner, SessionConfig, SessionError, SessionResult, SessionState, SessionStats};

/// Longueur maximale d'un message non reconnu recopié dans les logs
const RAW_LOG_LIMIT: usize = 200;

/// Événement à traiter par le contrôleur
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// Message ou fermeture venant du relais
    Transport(TransportEvent),

    /// Frame ou erreur venant du callback de capture
    Capture(CaptureEvent),

    /// Le flux de capture s'est arrêté de lui-même
    CaptureEnded,
}

/// Contrôleur de session
pub struct SessionController {
    config: SessionConfig,
    provisioner: Arc<dyn RelayProvisioner>,
    connector: Arc<dyn Connector>,
    capture: Box<dyn AudioCapture>,
    outputs: Arc<dyn OutputFactory>,

    state: SessionState,
    status: String,
    relay_url: Option<String>,

    transport: Option<Box<dyn Transport>>,
    frames: Option<mpsc::Receiver<CaptureEvent>>,
    scheduler: Option<PlaybackScheduler<Box<dyn OutputDevice>>>,

    stats: SessionStats,

    /// Compteur de pertes du micro au dernier `connect`
    capture_drops_baseline: u64,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        provisioner: Arc<dyn RelayProvisioner>,
        connector: Arc<dyn Connector>,
        capture: Box<dyn AudioCapture>,
        outputs: Arc<dyn OutputFactory>,
    ) -> Self {
        Self {
            config,
            provisioner,
            connector,
            capture,
            outputs,
            state: SessionState::Idle,
            status: SessionState::Idle.description(),
            relay_url: None,
            transport: None,
            frames: None,
            scheduler: None,
            stats: SessionStats::default(),
            capture_drops_baseline: 0,
        }
    }

    /// Ouvre la session : provisionnement, connexion, sortie audio
    ///
    /// Ne fait rien si la session est déjà connectée. En cas d'échec, tout
    /// ce qui a été ouvert est libéré et l'état passe à `Failed`.
    pub async fn connect(&mut self) -> SessionResult<()> {
        if self.state.is_connected() {
            return Ok(());
        }

        self.config.validate()?;
        self.stats = SessionStats::default();
        self.capture_drops_baseline = self.capture.dropped_frames();
        self.set_state(SessionState::Connecting, "Connexion au relais...");

        let url = match self.provisioner.obtain_relay_endpoint().await {
            Ok(url) => url,
            Err(e) => return Err(self.fail_with(e).await),
        };

        let transport = match network::connect(self.connector.as_ref(), &url, &self.config.network).await {
            Ok(transport) => transport,
            Err(e) => {
                let recoverable = e.is_recoverable();
                let error = self.fail_with(e.into()).await;
                if recoverable {
                    self.status = format!("{} (nouvelle tentative possible)", self.status);
                }
                return Err(error);
            }
        };
        self.transport = Some(transport);
        self.relay_url = Some(url);

        let output = match self.outputs.open(&self.config.audio) {
            Ok(output) => output,
            Err(e) => return Err(self.fail_with(e.into()).await),
        };
        self.scheduler = Some(PlaybackScheduler::new(output, self.config.audio.sample_rate));

        info!("✅ Session connectée à {}", self.relay_url.as_deref().unwrap_or("?"));
        self.set_state(SessionState::Connected, "Connecté");
        Ok(())
    }

    /// Démarre l'enregistrement, en se connectant d'abord si besoin
    ///
    /// Réutilise la connexion déjà ouverte. Si le micro est indisponible,
    /// la session reste `Connected` et l'erreur est retournée.
    pub async fn start_capture(&mut self) -> SessionResult<()> {
        if self.state == SessionState::Capturing {
            return Ok(());
        }

        self.connect().await?;

        let (tx, rx) = mpsc::channel(self.config.audio.frame_channel_capacity);
        if let Err(e) = self.capture.start(tx) {
            warn!("🎤 Micro indisponible: {}", e);
            self.status = format!("Micro indisponible : {}", e);
            return Err(e.into());
        }

        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.begin_capture();
        }
        self.frames = Some(rx);

        info!(
            "🎤 Enregistrement démarré ({}, frames de {:.0}ms / {} bytes)",
            self.capture.device_info(),
            self.config.audio.frame_duration_secs() * 1000.0,
            self.config.audio.pcm16_frame_bytes()
        );
        self.set_state(SessionState::Capturing, "Enregistrement...");
        Ok(())
    }

    /// Arrête l'enregistrement en gardant la connexion ouverte
    ///
    /// Les frames déjà complètes sont encore envoyées. Idempotent.
    pub async fn stop_capture(&mut self) -> SessionResult<()> {
        if self.state != SessionState::Capturing {
            return Ok(());
        }

        self.capture.stop();

        if let Some(mut frames) = self.frames.take() {
            while let Ok(event) = frames.try_recv() {
                if let CaptureEvent::Frame { pcm, .. } = event {
                    self.send_frame(&pcm).await;
                }
            }
        }

        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.end_capture();
        }

        // L'envoi des dernières frames a pu faire échouer la session
        if self.state == SessionState::Capturing {
            info!("🛑 Enregistrement arrêté, connexion conservée");
            self.set_state(SessionState::Connected, "Connecté");
        }
        Ok(())
    }

    /// Bascule enregistrement / arrêt
    pub async fn toggle_capture(&mut self) -> SessionResult<()> {
        if self.state == SessionState::Capturing {
            self.stop_capture().await
        } else {
            self.start_capture().await
        }
    }

    /// Démontage complet : tout est libéré, l'état passe à `Disconnected`
    ///
    /// Peut être appelé dans n'importe quel état, autant de fois que voulu.
    pub async fn close(&mut self) {
        self.teardown().await;

        if !matches!(self.state, SessionState::Disconnected | SessionState::Failed(_)) {
            info!("👋 Session fermée");
            self.set_state(SessionState::Disconnected, "Déconnecté");
        }
    }

    /// Attend le prochain événement (relais ou capture)
    ///
    /// Annulable sans perte, utilisable dans un `tokio::select!`. Attend
    /// indéfiniment si la session ne tient ni connexion ni capture.
    pub async fn next_event(&mut self) -> SessionEvent {
        let transport = self.transport.as_mut();
        let frames = self.frames.as_mut();

        tokio::select! {
            event = recv_transport(transport) => SessionEvent::Transport(event),
            event = recv_capture(frames) => match event {
                Some(event) => SessionEvent::Capture(event),
                None => SessionEvent::CaptureEnded,
            },
        }
    }

    /// Traite un événement obtenu par `next_event`
    pub async fn dispatch(&mut self, event: SessionEvent) -> SessionResult<()> {
        match event {
            SessionEvent::Transport(TransportEvent::Message(message)) => {
                self.handle_inbound(message);
            }
            SessionEvent::Transport(TransportEvent::Closed { reason, error }) => {
                self.handle_closed(reason, error).await;
            }
            SessionEvent::Capture(CaptureEvent::Frame { pcm, .. }) => {
                self.send_frame(&pcm).await;
            }
            SessionEvent::Capture(CaptureEvent::DeviceError(reason)) => {
                self.handle_capture_lost(&reason).await?;
            }
            SessionEvent::CaptureEnded => {
                self.frames = None;
                self.handle_capture_lost("flux de capture terminé").await?;
            }
        }
        Ok(())
    }

    /// Traite un message entrant du relais
    ///
    /// Aucune erreur de message n'est fatale : tout est compté et journalisé.
    pub fn handle_inbound(&mut self, message: WireMessage) {
        match message {
            WireMessage::AudioDelta { delta } => {
                self.stats.deltas_received += 1;
                self.play_delta(&delta);
            }
            WireMessage::ErrorNotice { error } => {
                self.stats.service_errors += 1;
                warn!("⚠️  Erreur du service: {}", error.message);
                self.status = format!("Erreur du service : {}", error.message);
            }
            WireMessage::Unrecognized { raw } => {
                self.stats.unrecognized_messages += 1;
                debug!("Message ignoré: {}", truncate(&raw, RAW_LOG_LIMIT));
            }
            WireMessage::AudioAppend { .. } => {
                self.stats.unrecognized_messages += 1;
                debug!("Message sortant reçu du relais, ignoré");
            }
        }
    }

    fn play_delta(&mut self, delta: &str) {
        let pcm = match codec::decode(delta) {
            Ok(pcm) => pcm,
            Err(e) => {
                self.stats.malformed_payloads += 1;
                warn!("Réponse audio rejetée: {}", e);
                return;
            }
        };

        let Some(scheduler) = self.scheduler.as_mut() else {
            debug!("Réponse audio reçue sans sortie ouverte, ignorée");
            return;
        };

        match scheduler.enqueue(&pcm) {
            Ok(Some(buffer)) => debug!(
                "🔊 {} échantillons planifiés à {:.3}s",
                pcm.len(),
                buffer.start_time
            ),
            Ok(None) => debug!("Réponse audio ignorée pendant l'enregistrement"),
            Err(e) if e.is_per_message() => warn!("Réponse audio perdue: {}", e),
            Err(e) => {
                error!("🔊 Sortie audio perdue: {}", e);
                self.status = format!("Sortie audio indisponible : {}", e);
            }
        }
    }

    /// Envoie une frame micro si l'enregistrement est actif
    async fn send_frame(&mut self, pcm: &Pcm16Buffer) {
        let transport = match self.transport.as_mut() {
            Some(transport) if self.state == SessionState::Capturing => transport,
            _ => {
                self.stats.frames_dropped += 1;
                debug!("Frame reçue hors enregistrement, ignorée");
                return;
            }
        };

        match transport.send(&WireMessage::audio_chunk(pcm)).await {
            Ok(()) => self.stats.frames_sent += 1,
            Err(NetworkError::NotConnected) => {
                // La fermeture arrive par `next_event`
                self.stats.frames_dropped += 1;
                debug!("Frame perdue: transport fermé");
            }
            Err(e) => {
                self.stats.frames_dropped += 1;
                if e.requires_reconnection() {
                    let _ = self.fail_with(e.into()).await;
                } else {
                    warn!("Frame non envoyée: {}", e);
                }
            }
        }
    }

    async fn handle_closed(&mut self, reason: String, error: bool) {
        if error {
            error!("❌ Connexion au relais perdue: {}", reason);
            let _ = self.fail_with(SessionError::ConnectionLost(reason)).await;
            return;
        }

        info!("🔌 Connexion fermée par le relais: {}", reason);
        self.teardown().await;
        self.set_state(SessionState::Disconnected, &format!("Connexion fermée : {}", reason));
    }

    /// Le micro a lâché : arrêt de l'enregistrement, la connexion reste
    async fn handle_capture_lost(&mut self, reason: &str) -> SessionResult<()> {
        if self.state != SessionState::Capturing {
            return Ok(());
        }

        warn!("🎤 Capture interrompue: {}", reason);
        self.stop_capture().await?;
        self.status = format!("Micro interrompu : {}", reason);
        Ok(())
    }

    /// Passe en `Failed` après avoir tout libéré ; retourne l'erreur
    async fn fail_with(&mut self, error: SessionError) -> SessionError {
        error!("❌ Échec de la session: {}", error);
        self.teardown().await;
        let reason = error.to_string();
        self.set_state(SessionState::Failed(reason.clone()), &reason);
        error
    }

    /// Libère toutes les ressources, dans l'ordre. Idempotent.
    async fn teardown(&mut self) {
        self.capture.stop();
        self.frames = None;

        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }

        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.close();
        }
    }

    fn set_state(&mut self, state: SessionState, status: &str) {
        debug!("État de session: {} → {}", self.state, state);
        self.state = state;
        self.status = status.to_string();
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Texte de statut à afficher (dernier événement marquant)
    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn relay_url(&self) -> Option<&str> {
        self.relay_url.as_deref()
    }

    pub fn transport_state(&self) -> ConnectionState {
        self.transport
            .as_ref()
            .map(|transport| transport.state())
            .unwrap_or(ConnectionState::Closed)
    }

    /// État de la lecture, `None` si aucune sortie n'est ouverte
    pub fn playback_status(&self) -> Option<PlaybackStatus> {
        self.scheduler.as_ref().map(|scheduler| scheduler.status())
    }

    pub fn stats(&self) -> SessionStats {
        let mut stats = self.stats.clone();
        stats.frames_dropped += self
            .capture
            .dropped_frames()
            .saturating_sub(self.capture_drops_baseline);
        stats
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        // Même ordre que `teardown`, sans la fermeture propre de la connexion
        self.capture.stop();
        self.frames = None;
        self.transport = None;
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.close();
        }
    }
}

async fn recv_transport(transport: Option<&mut Box<dyn Transport>>) -> TransportEvent {
    match transport {
        Some(transport) => transport.recv().await,
        None => pending().await,
    }
}

async fn recv_capture(frames: Option<&mut mpsc::Receiver<CaptureEvent>>) -> Option<CaptureEvent> {
    match frames {
        Some(frames) => frames.recv().await,
        None => pending().await,
    }
}

fn truncate(raw: &str, limit: usize) -> &str {
    match raw.char_indices().nth(limit) {
        Some((index, _)) => &raw[..index],
        None => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audio::{SimulatedCapture, SimulatedMicrophone, SimulatedOutputFactory, SimulatedOutputHandle};
    use network::{ConnectBehavior, RelayHandle, SimulatedConnector};

    use crate::StaticRelayEndpoint;

    struct Harness {
        controller: SessionController,
        relay: RelayHandle,
        mic: SimulatedMicrophone,
        output: SimulatedOutputHandle,
    }

    fn harness() -> Harness {
        let (connector, relay) = SimulatedConnector::new();
        let (capture, mic) = SimulatedCapture::new(4096);
        let (outputs, output) = SimulatedOutputFactory::new();

        let controller = SessionController::new(
            SessionConfig::test_config(),
            Arc::new(StaticRelayEndpoint::new("wss://example/relay")),
            Arc::new(connector),
            Box::new(capture),
            Arc::new(outputs),
        );

        Harness {
            controller,
            relay,
            mic,
            output,
        }
    }

    async fn pump(controller: &mut SessionController) {
        let event = controller.next_event().await;
        controller.dispatch(event).await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_reaches_connected() {
        let mut h = harness();

        h.controller.connect().await.unwrap();
        h.controller.connect().await.unwrap(); // Idempotent

        assert_eq!(h.controller.state(), &SessionState::Connected);
        assert_eq!(h.controller.relay_url(), Some("wss://example/relay"));
        assert_eq!(h.controller.transport_state(), ConnectionState::Open);
        assert_eq!(h.relay.connections(), 1);
        assert_eq!(h.output.open_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_timeout_fails_session() {
        let mut h = harness();
        h.relay.set_behavior(ConnectBehavior::Hang);

        let result = h.controller.connect().await;

        assert!(matches!(
            result,
            Err(SessionError::Network(NetworkError::ConnectionTimeout { .. }))
        ));
        assert!(matches!(h.controller.state(), SessionState::Failed(reason) if reason.contains("Timeout")));
        assert_eq!(h.output.open_count(), 0);

        // Un nouveau connect repart de zéro
        h.relay.set_behavior(ConnectBehavior::Accept);
        h.controller.connect().await.unwrap();
        assert_eq!(h.controller.state(), &SessionState::Connected);
    }

    #[tokio::test]
    async fn test_refused_connection_can_be_retried() {
        let mut h = harness();
        h.relay.set_behavior(ConnectBehavior::Refuse("503".to_string()));

        assert!(h.controller.connect().await.is_err());

        assert!(matches!(h.controller.state(), SessionState::Failed(_)));
        assert!(h.controller.status().contains("nouvelle tentative possible"));
    }

    #[tokio::test]
    async fn test_output_lost_during_playback_is_reported() {
        let mut h = harness();
        h.controller.connect().await.unwrap();
        h.output.set_failing(true);

        h.relay.push(WireMessage::AudioDelta {
            delta: codec::encode(&Pcm16Buffer::new(vec![0; 240])),
        });
        pump(&mut h.controller).await;

        assert!(h.controller.status().contains("Sortie audio indisponible"));
        assert_eq!(h.controller.state(), &SessionState::Connected);
        assert!(h.output.scheduled().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_frames_are_counted_per_connection() {
        let mut h = harness();
        h.controller.start_capture().await.unwrap();

        // 40 frames d'un coup pour une file de 32 : 8 sont jetées
        assert!(h.mic.feed(&vec![0.0; 4096 * 40]));
        assert_eq!(h.controller.stats().frames_dropped, 8);

        h.controller.close().await;
        h.controller.start_capture().await.unwrap();
        assert_eq!(h.controller.stats().frames_dropped, 0);
    }

    #[tokio::test]
    async fn test_output_failure_releases_transport() {
        let mut h = harness();
        h.output.set_failing(true);

        assert!(h.controller.connect().await.is_err());

        assert!(matches!(h.controller.state(), SessionState::Failed(_)));
        assert_eq!(h.relay.local_closes(), 1);
        assert!(!h.relay.is_open());
    }

    #[tokio::test]
    async fn test_capture_reuses_open_transport() {
        let mut h = harness();

        h.controller.start_capture().await.unwrap();
        assert_eq!(h.controller.state(), &SessionState::Capturing);
        h.controller.stop_capture().await.unwrap();
        h.controller.stop_capture().await.unwrap();
        assert_eq!(h.controller.state(), &SessionState::Connected);
        h.controller.start_capture().await.unwrap();

        assert_eq!(h.relay.connections(), 1);
        assert_eq!(h.mic.acquisitions(), 2);
        assert_eq!(h.mic.releases(), 1);
        assert!(h.relay.is_open());
    }

    #[tokio::test]
    async fn test_stop_capture_flushes_complete_frames() {
        let mut h = harness();
        h.controller.start_capture().await.unwrap();

        assert!(h.mic.feed(&vec![0.1; 4096 * 2 + 100]));
        h.controller.stop_capture().await.unwrap();

        // 2 frames complètes envoyées, le reste partiel est abandonné
        assert_eq!(h.relay.sent().len(), 2);
        assert_eq!(h.controller.stats().frames_sent, 2);
    }

    #[tokio::test]
    async fn test_device_error_stops_capture_keeps_connection() {
        let mut h = harness();
        h.controller.start_capture().await.unwrap();

        h.mic.fail_device("micro débranché");
        pump(&mut h.controller).await;

        assert_eq!(h.controller.state(), &SessionState::Connected);
        assert!(h.controller.status().contains("micro débranché"));
        assert_eq!(h.mic.releases(), 1);
        assert!(h.relay.is_open());
    }

    #[tokio::test]
    async fn test_transport_error_fails_and_releases() {
        let mut h = harness();
        h.controller.start_capture().await.unwrap();

        h.relay.fail("connection reset");
        pump(&mut h.controller).await;

        assert!(matches!(h.controller.state(), SessionState::Failed(reason) if reason.contains("connection reset")));
        assert_eq!(h.mic.releases(), 1);
        assert_eq!(h.output.close_count(), 1);
        assert!(h.controller.playback_status().is_none());
    }

    #[tokio::test]
    async fn test_unrecognized_and_malformed_are_counted() {
        let mut h = harness();
        h.controller.connect().await.unwrap();

        h.relay.push_text(r#"{"type":"session.created","session":{}}"#);
        h.relay.push_text(r#"{"type":"response.audio.delta","delta":"AQID"}"#);
        h.relay.push_text(r#"{"type":"response.audio.delta","delta":"%%%"}"#);
        for _ in 0..3 {
            pump(&mut h.controller).await;
        }

        let stats = h.controller.stats();
        assert_eq!(stats.unrecognized_messages, 1);
        assert_eq!(stats.deltas_received, 2);
        assert_eq!(stats.malformed_payloads, 2);
        assert_eq!(h.controller.state(), &SessionState::Connected);
        assert!(h.output.scheduled().is_empty());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("éèà", 2), "éè");
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[tokio::test]
    async fn test_drop_releases_devices() {
        let h = harness();
        let mut controller = h.controller;
        controller.start_capture().await.unwrap();

        drop(controller);

        assert_eq!(h.mic.releases(), 1);
        assert_eq!(h.output.close_count(), 1);
    }
}
