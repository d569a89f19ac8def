//! Session manager: owns the lifecycle of the single messaging connection.
//!
//! - loads (or seeds) credentials and opens a connection
//! - persists rotated credentials before acknowledging them
//! - on `Open`: publishes the live session, starts the heartbeat, notifies the operator
//! - on close: stops for a logout, otherwise restarts the whole procedure

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    credentials::{AuthState, CredentialStore},
    dispatcher::EventDispatcher,
    domain::{CloseReason, Jid, MessageBatch},
    errors::Error,
    heartbeat::Heartbeat,
    reconnect::Backoff,
    transport::{Connection, ConnectionUpdate, Connector, Session, SessionEvent},
    Result,
};

pub const READY_NOTICE: &str = "✅ *Successfully deployed!*\n\nType *,menu* to start.";

pub fn session_id_notice(blob: &str) -> String {
    format!("*SESSION ID GENERATED* 🔑\n\nCopy for Koyeb:\n\n{blob}")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    ClosedTransient,
    ClosedTerminal,
}

/// Why `SessionManager::run` returned without an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// The account logged this device out; re-pairing is required.
    LoggedOut,
    Shutdown,
}

#[derive(Clone, Debug, Default)]
pub struct SessionInfo {
    pub own_id: Option<Jid>,
    pub opened_at: Option<DateTime<Utc>>,
    pub last_close_reason: Option<CloseReason>,
    pub opens: u32,
}

/// Swappable handle to the live session.
///
/// Consumers dereference it at use time so they never act on a superseded
/// connection they captured earlier.
#[derive(Clone, Default)]
pub struct SessionSlot {
    inner: Arc<RwLock<Option<Arc<dyn Session>>>>,
}

impl SessionSlot {
    pub async fn current(&self) -> Option<Arc<dyn Session>> {
        self.inner.read().await.clone()
    }

    async fn replace(&self, session: Option<Arc<dyn Session>>) {
        *self.inner.write().await = session;
    }
}

enum Outcome {
    Closed(CloseReason),
    HandshakeFailed,
    Shutdown,
}

pub struct SessionManager {
    cfg: Arc<Config>,
    store: CredentialStore,
    connector: Arc<dyn Connector>,
    dispatcher: Arc<EventDispatcher>,
    slot: SessionSlot,
    state: watch::Sender<SessionState>,
    info: Mutex<SessionInfo>,
}

impl SessionManager {
    pub fn new(
        cfg: Arc<Config>,
        connector: Arc<dyn Connector>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            store: CredentialStore::new(&cfg.session_dir),
            cfg,
            connector,
            dispatcher,
            slot: SessionSlot::default(),
            state,
            info: Mutex::new(SessionInfo::default()),
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn slot(&self) -> SessionSlot {
        self.slot.clone()
    }

    pub async fn info(&self) -> SessionInfo {
        self.info.lock().await.clone()
    }

    fn set_state(&self, next: SessionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(from = ?prev, to = ?next, "session state");
        }
    }

    /// Keep one session alive until logout, shutdown or a fatal error.
    ///
    /// Storage failures and an exhausted reconnect budget are returned as
    /// errors; everything else short of a logout is retried.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<Termination> {
        let mut backoff = Backoff::new(self.cfg.reconnect_policy());
        let mut announced = false;

        loop {
            if shutdown.is_cancelled() {
                self.set_state(SessionState::Idle);
                return Ok(Termination::Shutdown);
            }

            self.set_state(SessionState::Connecting);
            let auth = match self.prepare_credentials() {
                Ok(auth) => auth,
                Err(e) => {
                    error!(error = %e, dir = %self.store.dir().display(), "cannot load credentials");
                    self.set_state(SessionState::Idle);
                    return Err(e);
                }
            };
            if auth.is_none() {
                info!("no stored credentials; waiting for pairing");
            }

            let outcome = match self
                .connector
                .connect(auth, self.cfg.connect_options())
                .await
            {
                Ok(conn) => self.drive(conn, &shutdown, &mut backoff, &mut announced).await,
                Err(e) => {
                    warn!(error = %e, "connection attempt failed");
                    Ok(Outcome::HandshakeFailed)
                }
            };

            let outcome = match outcome {
                Ok(o) => o,
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "fatal session error");
                    self.set_state(SessionState::Idle);
                    return Err(e);
                }
                Err(e) => {
                    warn!(error = %e, "session failed; restarting");
                    Outcome::HandshakeFailed
                }
            };

            match outcome {
                Outcome::Shutdown => {
                    self.set_state(SessionState::Idle);
                    return Ok(Termination::Shutdown);
                }
                Outcome::Closed(reason) if reason.is_terminal() => {
                    self.info.lock().await.last_close_reason = Some(reason);
                    self.set_state(SessionState::ClosedTerminal);
                    error!(reason = %reason, "logged out; re-pair the device to continue");
                    return Ok(Termination::LoggedOut);
                }
                Outcome::Closed(reason) => {
                    self.info.lock().await.last_close_reason = Some(reason);
                    self.set_state(SessionState::ClosedTransient);
                    warn!(reason = %reason, "connection closed");
                }
                Outcome::HandshakeFailed => {
                    self.set_state(SessionState::ClosedTransient);
                }
            }

            let Some(delay) = backoff.next_delay() else {
                let attempts = backoff.failures();
                error!(attempts, "giving up on reconnecting");
                self.set_state(SessionState::Idle);
                return Err(Error::ReconnectExhausted { attempts });
            };
            info!(attempt = backoff.failures(), delay_ms = delay.as_millis() as u64, "reconnecting");
            if !delay.is_zero() {
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    fn prepare_credentials(&self) -> Result<Option<AuthState>> {
        if let Some(encoded) = &self.cfg.session_id {
            self.store.seed(encoded)?;
        }
        self.store.load()
    }

    /// Consume one connection's events until it closes, then tear it down.
    async fn drive(
        &self,
        conn: Connection,
        shutdown: &CancellationToken,
        backoff: &mut Backoff,
        announced: &mut bool,
    ) -> Result<Outcome> {
        let Connection {
            session,
            mut events,
        } = conn;
        let mut heartbeat: Option<Heartbeat> = None;

        let result = self
            .pump(&session, &mut events, &mut heartbeat, shutdown, backoff, announced)
            .await;

        if let Some(hb) = heartbeat.take() {
            hb.stop().await;
        }
        self.slot.replace(None).await;
        if let Err(e) = session.disconnect().await {
            debug!(error = %e, "disconnect after close failed");
        }

        result
    }

    async fn pump(
        &self,
        session: &Arc<dyn Session>,
        events: &mut mpsc::Receiver<SessionEvent>,
        heartbeat: &mut Option<Heartbeat>,
        shutdown: &CancellationToken,
        backoff: &mut Backoff,
        announced: &mut bool,
    ) -> Result<Outcome> {
        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(Outcome::Shutdown),
                ev = events.recv() => ev,
            };
            let Some(event) = event else {
                return Ok(Outcome::Closed(CloseReason::ConnectionLost));
            };

            match event {
                SessionEvent::Connection(ConnectionUpdate::Connecting) => {
                    debug!("transport connecting");
                }
                SessionEvent::Connection(ConnectionUpdate::PairingCode(code)) => {
                    // The QR itself is rendered by the transport (`print_pairing_code`).
                    info!(
                        payload = %code,
                        "pairing payload received; scan the QR code shown by the bridge"
                    );
                }
                SessionEvent::Connection(ConnectionUpdate::Open { own_id }) => {
                    backoff.reset();
                    self.slot.replace(Some(session.clone())).await;
                    {
                        let mut info = self.info.lock().await;
                        info.own_id = Some(own_id.clone());
                        info.opened_at = Some(Utc::now());
                        info.opens += 1;
                    }
                    self.set_state(SessionState::Open);
                    info!(id = %own_id, "bot connected");

                    let next = Heartbeat::spawn(session.clone(), self.cfg.heartbeat_interval);
                    if let Some(old) = heartbeat.replace(next) {
                        old.stop().await;
                    }
                    self.announce_open(session.clone(), &own_id, announced);
                }
                SessionEvent::Connection(ConnectionUpdate::Close { reason }) => {
                    return Ok(Outcome::Closed(reason));
                }
                SessionEvent::CredentialsRotated { creds, ack } => {
                    self.store.save(&creds)?;
                    ack.send();
                    debug!("credentials saved");
                }
                SessionEvent::KeysUpdated { writes, ack } => {
                    self.store.write_keys(&writes)?;
                    ack.send();
                    debug!(count = writes.len(), "keys saved");
                }
                SessionEvent::Messages(batch) => self.spawn_dispatch(batch),
                SessionEvent::Presence(update) => {
                    debug!(chat = %update.chat, presence = update.presence.as_str(), "presence update");
                }
            }
        }
    }

    /// Pick the Open notice and send it from its own task.
    ///
    /// The send's reply travels on the same event stream `pump` reads, so it
    /// must never be awaited from the pump itself.
    fn announce_open(&self, session: Arc<dyn Session>, own_id: &Jid, announced: &mut bool) {
        let own_chat = own_id.to_user_chat();

        let text = if !self.cfg.is_seeded_externally() && !*announced {
            match self.store.export_encoded() {
                Ok(Some(blob)) => {
                    *announced = true;
                    info!(session_id = %blob, "session id generated; set it as SESSION_ID to deploy");
                    session_id_notice(&blob)
                }
                Ok(None) => {
                    error!("could not read session file for session id generation");
                    return;
                }
                Err(e) => {
                    error!(error = %e, "could not read session file for session id generation");
                    return;
                }
            }
        } else {
            READY_NOTICE.to_string()
        };

        tokio::spawn(async move {
            if let Err(e) = session.send_text(&own_chat, &text, None).await {
                warn!(chat = %own_chat, error = %e, "failed to send startup notice");
            }
        });
    }

    /// Batches run on their own task so a slow model call never stalls the
    /// event loop (or credential saves behind it).
    fn spawn_dispatch(&self, batch: MessageBatch) {
        let slot = self.slot.clone();
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            let Some(session) = slot.current().await else {
                debug!(count = batch.messages.len(), "no live session; dropping batch");
                return;
            };
            let report = dispatcher.on_batch(session, batch).await;
            if report.failures > 0 {
                debug!(
                    dispatched = report.dispatched,
                    failures = report.failures,
                    "batch finished with handler failures"
                );
            }
        });
    }
}
