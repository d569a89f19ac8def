//! Bridge adapter (WhatsApp Web transport).
//!
//! The multi-device protocol is spoken by an external bridge process. Each
//! `connect` spawns a fresh bridge and talks to it over JSON Lines on
//! stdio; see [`protocol`].

pub mod protocol;
pub mod session;

use std::{path::PathBuf, process::Stdio, sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wabot_core::{
    config::Config,
    credentials::AuthState,
    domain::MessageBatch,
    errors::Error,
    transport::{Ack, ConnectOptions, Connection, Connector, SessionEvent},
    Result,
};

use crate::{
    protocol::{connection_updates, BridgeCommand, BridgeEvent},
    session::{complete, BridgeSession, Pending},
};

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 256;
/// How long the bridge gets to exit on its own after `shutdown`.
const EXIT_GRACE: Duration = Duration::from_secs(3);

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub command: PathBuf,
    pub args: Vec<String>,
    pub request_timeout: Duration,
}

impl BridgeConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            command: cfg.bridge_command.clone(),
            args: cfg.bridge_args.clone(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Debug)]
pub struct BridgeConnector {
    cfg: BridgeConfig,
}

impl BridgeConnector {
    pub fn new(cfg: BridgeConfig) -> Self {
        Self { cfg }
    }

    fn spawn_child(&self) -> std::io::Result<Child> {
        let mut cmd = Command::new(&self.cfg.command);
        cmd.args(&self.cfg.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd.spawn()
    }
}

#[async_trait]
impl Connector for BridgeConnector {
    async fn connect(
        &self,
        auth: Option<AuthState>,
        options: ConnectOptions,
    ) -> Result<Connection> {
        info!(
            command = %self.cfg.command.display(),
            resume = auth.is_some(),
            "spawning bridge"
        );

        let mut child = self.spawn_child().map_err(|e| {
            Error::Transport(format!(
                "failed to spawn bridge {}: {e}",
                self.cfg.command.display()
            ))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transport("bridge stdin was not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transport("bridge stdout was not captured".to_string()))?;

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (evt_tx, evt_rx) = mpsc::channel(EVENT_BUFFER);
        let pending: Pending = Arc::default();
        let stop = CancellationToken::new();

        cmd_tx
            .send(BridgeCommand::Connect { auth, options })
            .await
            .map_err(|_| Error::Transport("bridge command channel closed".to_string()))?;

        tokio::spawn({
            let stop = stop.clone();
            async move {
                if let Err(e) = write_commands(stdin, cmd_rx, stop.clone()).await {
                    warn!(error = %format!("{e:#}"), "bridge writer stopped");
                    stop.cancel();
                }
            }
        });
        tokio::spawn(read_events(
            child,
            stdout,
            evt_tx,
            cmd_tx.clone(),
            pending.clone(),
            stop.clone(),
        ));

        let session = Arc::new(BridgeSession::new(
            cmd_tx,
            pending,
            self.cfg.request_timeout,
            stop,
        ));
        Ok(Connection {
            session,
            events: evt_rx,
        })
    }
}

async fn write_line(stdin: &mut ChildStdin, cmd: &BridgeCommand) -> anyhow::Result<()> {
    let mut line = serde_json::to_string(cmd).context("encode bridge command")?;
    line.push('\n');
    stdin
        .write_all(line.as_bytes())
        .await
        .context("write to bridge stdin")?;
    stdin.flush().await.context("flush bridge stdin")?;
    Ok(())
}

/// Forward commands to the bridge until `shutdown` is written or `stop`
/// fires. Commands already queued when `stop` fires are still written.
async fn write_commands(
    mut stdin: ChildStdin,
    mut commands: mpsc::Receiver<BridgeCommand>,
    stop: CancellationToken,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            cmd = commands.recv() => {
                let Some(cmd) = cmd else { break };
                write_line(&mut stdin, &cmd).await?;
                if cmd == BridgeCommand::Shutdown {
                    break;
                }
            }
            _ = stop.cancelled() => {
                while let Ok(cmd) = commands.try_recv() {
                    write_line(&mut stdin, &cmd).await?;
                }
                break;
            }
        }
    }
    debug!("bridge writer finished");
    Ok(())
}

/// Read bridge stdout until EOF or `stop`, then reap the process.
///
/// Dropping `events` on return ends the session's event stream.
async fn read_events(
    mut child: Child,
    stdout: ChildStdout,
    events: mpsc::Sender<SessionEvent>,
    commands: mpsc::Sender<BridgeCommand>,
    pending: Pending,
    stop: CancellationToken,
) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        let line = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("bridge stdout closed");
                break;
            }
            Err(e) => {
                error!(error = %e, "error reading bridge stdout");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<BridgeEvent>(&line) {
            Ok(ev) => {
                if !route(ev, &events, &commands, &pending).await {
                    debug!("session event receiver dropped");
                    break;
                }
            }
            Err(e) => {
                warn!(line = %truncate(&line, 200), error = %e, "unparseable bridge line");
            }
        }
    }

    // Fail in-flight requests fast instead of letting them time out.
    pending.lock().await.clear();
    stop.cancel();

    match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
        Ok(Ok(status)) => info!(%status, "bridge exited"),
        Ok(Err(e)) => warn!(error = %e, "failed to reap bridge"),
        Err(_) => {
            warn!("bridge did not exit; killing it");
            if let Err(e) = child.kill().await {
                error!(error = %e, "failed to kill bridge");
            }
        }
    }
}

/// Deliver one bridge event. Returns `false` once the session side is gone.
async fn route(
    ev: BridgeEvent,
    events: &mpsc::Sender<SessionEvent>,
    commands: &mpsc::Sender<BridgeCommand>,
    pending: &Pending,
) -> bool {
    let out = match ev {
        BridgeEvent::Connection {
            state,
            qr,
            own_id,
            status_code,
        } => {
            for update in connection_updates(state, qr, own_id, status_code) {
                if events.send(SessionEvent::Connection(update)).await.is_err() {
                    return false;
                }
            }
            return true;
        }
        BridgeEvent::CredsUpdate { ack_id, creds } => SessionEvent::CredentialsRotated {
            creds,
            ack: acknowledge(ack_id, commands),
        },
        BridgeEvent::KeysUpdate { ack_id, writes } => SessionEvent::KeysUpdated {
            writes,
            ack: acknowledge(ack_id, commands),
        },
        BridgeEvent::MessagesUpsert { mode, messages } => {
            SessionEvent::Messages(MessageBatch { mode, messages })
        }
        BridgeEvent::PresenceUpdate(update) => SessionEvent::Presence(update),
        BridgeEvent::Result {
            request_id,
            ok,
            error,
            message_id,
        } => {
            complete(pending, &request_id, ok, error, message_id).await;
            return true;
        }
        BridgeEvent::Log { level, message } => {
            match level.as_str() {
                "error" | "fatal" => error!(bridge = true, "{message}"),
                "warn" => warn!(bridge = true, "{message}"),
                "info" => info!(bridge = true, "{message}"),
                _ => debug!(bridge = true, "{message}"),
            }
            return true;
        }
    };

    events.send(out).await.is_ok()
}

/// An `Ack` that writes `ack` back to the bridge once the consumer fires it.
fn acknowledge(ack_id: Option<u64>, commands: &mpsc::Sender<BridgeCommand>) -> Ack {
    let Some(ack_id) = ack_id else {
        return Ack::none();
    };
    let (ack, done) = Ack::new();
    let commands = commands.clone();
    tokio::spawn(async move {
        // A dropped ack means the update was not persisted; stay silent.
        if done.await.is_ok() {
            let _ = commands.send(BridgeCommand::Ack { ack_id }).await;
        }
    });
    ack
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}…", s.chars().take(max).collect::<String>())
    }
}
