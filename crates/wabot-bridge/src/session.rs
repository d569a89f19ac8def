//! `Session` implementation that forwards operations to the bridge and
//! waits for the matching `result` line.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use wabot_core::{
    domain::{InboundMessage, Jid, MessageKey, Presence},
    errors::Error,
    transport::Session,
    Result,
};

use crate::protocol::BridgeCommand;

/// Outcome of one request: the bridge's message id on success.
pub(crate) type Reply = Result<Option<String>>;

/// Requests still waiting for a `result` line, by request id.
pub(crate) type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Reply>>>>;

pub struct BridgeSession {
    commands: mpsc::Sender<BridgeCommand>,
    pending: Pending,
    next_id: AtomicU64,
    request_timeout: Duration,
    stop: CancellationToken,
}

impl BridgeSession {
    pub(crate) fn new(
        commands: mpsc::Sender<BridgeCommand>,
        pending: Pending,
        request_timeout: Duration,
        stop: CancellationToken,
    ) -> Self {
        Self {
            commands,
            pending,
            next_id: AtomicU64::new(0),
            request_timeout,
            stop,
        }
    }

    async fn request(&self, build: impl FnOnce(String) -> BridgeCommand) -> Reply {
        if self.stop.is_cancelled() {
            return Err(Error::NotConnected);
        }

        let id = format!("req-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        if self.commands.send(build(id.clone())).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(Error::NotConnected);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            // The reader dropped every waiter: the bridge is gone.
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::Transport(format!(
                    "bridge request {id} timed out after {:?}",
                    self.request_timeout
                )))
            }
        }
    }
}

#[async_trait]
impl Session for BridgeSession {
    async fn send_text(
        &self,
        chat: &Jid,
        text: &str,
        quoted: Option<&InboundMessage>,
    ) -> Result<MessageKey> {
        let message_id = self
            .request(|request_id| BridgeCommand::SendText {
                request_id,
                chat: chat.clone(),
                text: text.to_string(),
                quoted: quoted.cloned(),
            })
            .await?;
        Ok(MessageKey {
            remote_jid: chat.clone(),
            from_me: true,
            id: message_id.unwrap_or_default(),
            participant: None,
        })
    }

    async fn send_reaction(&self, chat: &Jid, key: &MessageKey, emoji: &str) -> Result<()> {
        self.request(|request_id| BridgeCommand::SendReaction {
            request_id,
            chat: chat.clone(),
            key: key.clone(),
            emoji: emoji.to_string(),
        })
        .await?;
        Ok(())
    }

    async fn read_messages(&self, keys: &[MessageKey]) -> Result<()> {
        self.request(|request_id| BridgeCommand::ReadMessages {
            request_id,
            keys: keys.to_vec(),
        })
        .await?;
        Ok(())
    }

    async fn send_presence(&self, presence: Presence) -> Result<()> {
        self.request(|request_id| BridgeCommand::SendPresence {
            request_id,
            presence,
        })
        .await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if self.stop.is_cancelled() {
            return Ok(());
        }
        if self.commands.send(BridgeCommand::Shutdown).await.is_err() {
            debug!("bridge writer already gone");
        }
        self.stop.cancel();
        Ok(())
    }
}

/// Resolve the waiter for `request_id`, if any.
pub(crate) async fn complete(
    pending: &Pending,
    request_id: &str,
    ok: bool,
    error: Option<String>,
    message_id: Option<String>,
) {
    let Some(tx) = pending.lock().await.remove(request_id) else {
        debug!(request_id, "result for unknown request");
        return;
    };
    let reply = if ok {
        Ok(message_id)
    } else {
        Err(Error::Transport(
            error.unwrap_or_else(|| "bridge request failed".to_string()),
        ))
    };
    let _ = tx.send(reply);
}
