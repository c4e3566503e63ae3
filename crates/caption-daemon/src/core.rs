/// SessionCore: single-owner event loop for one encoder link.
///
/// Owns the session, frame decoder, caption window, status reporter and all
/// timers.  Socket happenings arrive as `SessionEvent::Link` messages tagged
/// with the generation of the connection attempt that produced them; anything
/// from an older generation is ignored, so a torn-down link can never touch
/// the current one.
///
/// Timers are plain deadlines raced against the event channel in one
/// `select!`.  Each kind (reconnect, silence, keep-alive) is a single
/// `Option<Instant>`, so arming one always replaces the previous one.
///
/// After every window mutation the rendered captions are written to the
/// `StateManager` and broadcast as `CaptionsUpdated`.
use std::sync::Arc;

use caption_proto::encoder::{KEEP_ALIVE, KEEP_ALIVE_INTERVAL, RECONNECT_INTERVAL, REQUEST_CAPTIONS};
use caption_proto::error::CaptionError;
use caption_proto::framing::{FrameDecoder, FramingStrategy};
use caption_proto::protocol::{Command, ConnectionState, InstanceStatus};
use caption_proto::session::Session;
use caption_proto::state::StateManager;
use caption_proto::window::CaptionWindow;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::link::{Connector, LinkEvent, LinkHandle, TcpConnector};
use crate::status::StatusReporter;
use crate::BroadcastMessage;

// ── SessionEvent ──────────────────────────────────────────────────────────────

/// All inputs into the SessionCore loop.
#[derive(Debug)]
pub enum SessionEvent {
    /// Something happened on connection attempt `generation`.
    Link { generation: u64, event: LinkEvent },
    /// A command from a local client or the HTTP API.
    ClientCommand(Command),
    /// Tear everything down and leave the loop.
    Shutdown,
}

#[derive(Debug, Default)]
struct Timers {
    reconnect: Option<Instant>,
    silence: Option<Instant>,
    keep_alive: Option<Instant>,
}

impl Timers {
    fn cancel_all(&mut self) {
        self.reconnect = None;
        self.silence = None;
        self.keep_alive = None;
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ── SessionCore ───────────────────────────────────────────────────────────────

pub struct SessionCore {
    session: Session,
    decoder: FrameDecoder,
    window: CaptionWindow,
    status: StatusReporter,
    state_manager: Arc<StateManager>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    /// Handed to every link task so it can report back into this loop.
    event_tx: mpsc::Sender<SessionEvent>,
    connector: Box<dyn Connector>,
    /// Bumped on every connection attempt.
    generation: u64,
    link_task: Option<tokio::task::JoinHandle<()>>,
    /// Writer handle of the live link.  `None` until connected.
    link: Option<LinkHandle>,
    connection: ConnectionState,
    timers: Timers,
}

impl SessionCore {
    pub fn new(
        session: Session,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self::with_connector(session, broadcast_tx, event_tx, Box::new(TcpConnector))
    }

    pub fn with_connector(
        session: Session,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<SessionEvent>,
        connector: Box<dyn Connector>,
    ) -> Self {
        let state_manager = Arc::new(StateManager::new(&session.host, session.port));
        Self {
            decoder: session.decoder(),
            window: session.window(),
            session,
            status: StatusReporter::default(),
            state_manager,
            broadcast_tx,
            event_tx,
            connector,
            generation: 0,
            link_task: None,
            link: None,
            connection: ConnectionState::Connecting,
            timers: Timers::default(),
        }
    }

    /// Shared view for the socket and HTTP servers.
    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    /// Connect, then process events until `Shutdown` or until every sender
    /// is gone.  Always tears down before returning.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<SessionEvent>) -> anyhow::Result<()> {
        info!("SessionCore: starting event loop");
        self.report(InstanceStatus::Connecting, "Initialising").await;
        self.init_tcp().await;

        loop {
            tokio::select! {
                evt = event_rx.recv() => match evt {
                    None => {
                        info!("SessionCore: event channel closed, shutting down");
                        break;
                    }
                    Some(SessionEvent::Shutdown) => {
                        info!("SessionCore: shutdown requested");
                        break;
                    }
                    Some(SessionEvent::Link { generation, event }) => {
                        self.handle_link_event(generation, event).await;
                    }
                    Some(SessionEvent::ClientCommand(cmd)) => {
                        self.handle_command(cmd).await;
                    }
                },
                _ = deadline(self.timers.reconnect) => self.on_reconnect_due().await,
                _ = deadline(self.timers.silence) => self.on_silence_elapsed().await,
                _ = deadline(self.timers.keep_alive) => self.on_keep_alive_due(),
            }
        }

        self.destroy();
        Ok(())
    }

    // ── connection lifecycle ──────────────────────────────────────────────────

    /// Start a fresh connection attempt, dropping whatever link and timers
    /// exist.  An empty host stops here with BadConfig.
    async fn init_tcp(&mut self) {
        self.close_link();
        self.timers.cancel_all();
        self.generation += 1;

        if !self.session.has_host() {
            let err = CaptionError::MissingHost;
            warn!("SessionCore: {}, not connecting", err);
            self.set_connection(ConnectionState::BadConfig).await;
            self.report(InstanceStatus::BadConfig, err.to_string()).await;
            return;
        }

        self.decoder.reset();
        if self.decoder.strategy() == FramingStrategy::Sanitize
            && !self.window.is_empty()
        {
            self.window.clear();
            self.publish_captions().await;
        }

        info!(
            "SessionCore: connecting to {} (attempt {})",
            self.session.address(),
            self.generation
        );
        self.set_connection(ConnectionState::Connecting).await;
        self.report(
            InstanceStatus::Connecting,
            format!("Connecting to {}", self.session.address()),
        )
        .await;
        self.link_task = Some(
            self.connector
                .open(self.generation, &self.session, self.event_tx.clone()),
        );
    }

    /// Abort the link task (closing the socket) and forget its handle.
    fn close_link(&mut self) {
        if let Some(task) = self.link_task.take() {
            task.abort();
        }
        self.link = None;
    }

    fn schedule_reconnect(&mut self) {
        self.timers.reconnect = Some(Instant::now() + RECONNECT_INTERVAL);
        debug!(
            "SessionCore: reconnect to {} in {:?}",
            self.session.address(),
            RECONNECT_INTERVAL
        );
    }

    /// Synchronous teardown: socket, timers and status cache all go.
    fn destroy(&mut self) {
        info!("SessionCore: destroy ({})", self.session.address());
        self.close_link();
        self.timers.cancel_all();
        self.status.release();
    }

    // ── link events ───────────────────────────────────────────────────────────

    async fn handle_link_event(&mut self, generation: u64, event: LinkEvent) {
        if generation != self.generation {
            debug!(
                "SessionCore: dropping {:?} from stale link {} (current {})",
                event, generation, self.generation
            );
            return;
        }
        match event {
            LinkEvent::Connected(handle) => self.on_connected(handle).await,
            LinkEvent::Data(bytes) => self.on_data(&bytes).await,
            LinkEvent::Drain => self.on_drain(),
            LinkEvent::End => self.on_end().await,
            LinkEvent::Error(err) => self.on_error(err).await,
            LinkEvent::RequestFailed(err) => self.on_request_failed(err).await,
        }
    }

    async fn on_connected(&mut self, handle: LinkHandle) {
        info!("SessionCore: connected to {}", self.session.address());
        self.decoder.reset();
        self.link = Some(handle.clone());
        self.set_connection(ConnectionState::Connected).await;
        self.report(InstanceStatus::Ok, "Connected").await;

        // The reply can take up to SEND_TIMEOUT; the loop keeps running meanwhile.
        debug!("SessionCore: sending caption request {:?}", REQUEST_CAPTIONS);
        let generation = self.generation;
        let events = self.event_tx.clone();
        tokio::spawn(async move {
            match handle.send(REQUEST_CAPTIONS).await {
                Ok(()) => debug!("SessionCore: caption request sent"),
                Err(e) => {
                    let event = LinkEvent::RequestFailed(e.to_string());
                    let _ = events.send(SessionEvent::Link { generation, event }).await;
                }
            }
        });
    }

    async fn on_request_failed(&mut self, err: String) {
        warn!(
            "SessionCore: caption request to {} failed: {}",
            self.session.address(),
            err
        );
        self.report(InstanceStatus::UnknownWarning, "Caption request failed")
            .await;
    }

    async fn on_data(&mut self, bytes: &[u8]) {
        debug!("SessionCore: data received: {:?}", String::from_utf8_lossy(bytes));
        self.timers.silence = None;
        self.timers.keep_alive = None;

        let report = self.decoder.decode(bytes, &mut self.window);
        if report.device_error {
            let err = CaptionError::DeviceError;
            error!("SessionCore: {} ({})", err, self.session.address());
            self.report(InstanceStatus::UnknownError, err.to_string()).await;
        }
        if report.changed {
            self.publish_captions().await;
        }
    }

    fn on_drain(&mut self) {
        let now = Instant::now();
        if self.session.clear_after_interval {
            self.timers.silence = Some(now + self.session.silence_interval);
        }
        if self.session.keep_alive {
            self.timers.keep_alive = Some(now + KEEP_ALIVE_INTERVAL);
        }
    }

    async fn on_end(&mut self) {
        warn!("SessionCore: disconnected from {}", self.session.address());
        self.link = None;
        self.timers.silence = None;
        self.timers.keep_alive = None;
        self.schedule_reconnect();
        self.set_connection(ConnectionState::RetryPending).await;
        self.report(
            InstanceStatus::UnknownWarning,
            format!("Disconnected from {}", self.session.host),
        )
        .await;
    }

    async fn on_error(&mut self, err: String) {
        error!(
            "SessionCore: socket error on {}: {}",
            self.session.address(),
            err
        );
        self.close_link();
        self.timers.silence = None;
        self.timers.keep_alive = None;
        self.set_connection(ConnectionState::Error).await;
        self.report(InstanceStatus::UnknownError, err).await;
        self.schedule_reconnect();
        self.set_connection(ConnectionState::RetryPending).await;
    }

    // ── timers ────────────────────────────────────────────────────────────────

    async fn on_reconnect_due(&mut self) {
        self.timers.reconnect = None;
        self.init_tcp().await;
    }

    /// Repeats every `silence_interval` until data arrives or the link goes.
    async fn on_silence_elapsed(&mut self) {
        debug!("SessionCore: silence, clearing captions");
        self.timers.silence = Some(Instant::now() + self.session.silence_interval);
        self.window.clear();
        self.publish_captions().await;
    }

    fn on_keep_alive_due(&mut self) {
        self.timers.keep_alive = Some(Instant::now() + KEEP_ALIVE_INTERVAL);
        if self.connection != ConnectionState::Connected {
            return;
        }
        if let Some(link) = self.link.as_ref().filter(|l| l.is_connected()) {
            let link = link.clone();
            // Failures (including after teardown) are not worth reporting.
            tokio::spawn(async move {
                if let Err(e) = link.send(KEEP_ALIVE).await {
                    debug!("SessionCore: keep-alive not sent: {}", e);
                }
            });
        }
    }

    // ── client commands ───────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) {
        info!("SessionCore: command {:?}", cmd);
        match cmd {
            Command::GetState => {}
            Command::ClearCaptions => {
                self.window.clear();
                self.publish_captions().await;
            }
            Command::Reconnect => self.init_tcp().await,
            Command::Configure { encoder } => self.reconfigure(encoder.session()).await,
        }
    }

    /// Swap in a new session and start over with it.
    async fn reconfigure(&mut self, session: Session) {
        if session.framing != self.session.framing {
            self.decoder = session.decoder();
            self.window = session.window();
            self.publish_captions().await;
        } else {
            self.window.set_capacity(session.lines);
        }
        self.state_manager
            .set_target(&session.host, session.port)
            .await;
        self.session = session;
        self.report(InstanceStatus::Connecting, "Reconfigured").await;
        self.init_tcp().await;
    }

    // ── publishing ────────────────────────────────────────────────────────────

    async fn publish_captions(&mut self) {
        let text = self.window.render();
        self.state_manager.set_captions(text.clone()).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::CaptionsUpdated(text));
    }

    async fn report(&mut self, status: InstanceStatus, message: impl Into<String>) {
        if let Some((status, message)) = self.status.update(status, message, Instant::now()) {
            info!("SessionCore: status {:?} {}", status, message);
            self.state_manager
                .set_status(status, message.clone())
                .await;
            let _ = self
                .broadcast_tx
                .send(BroadcastMessage::StatusUpdated { status, message });
        }
    }

    async fn set_connection(&mut self, connection: ConnectionState) {
        self.connection = connection;
        self.state_manager.set_connection(connection).await;
    }
}
