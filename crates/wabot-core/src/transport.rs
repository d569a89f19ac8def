//! Ports for the messaging transport.
//!
//! A `Connector` opens one authenticated connection and hands back a `Session`
//! handle plus the stream of events that connection produces. Adapters (the
//! stdio bridge, test fakes) implement these traits.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::{
    credentials::{AuthState, CredentialState, KeyWrite},
    domain::{CloseReason, InboundMessage, Jid, MessageBatch, MessageKey, Presence, PresenceUpdate},
    Result,
};

/// One live connection to the messaging network.
#[async_trait]
pub trait Session: Send + Sync {
    /// Send a text message, optionally quoting `quoted`.
    async fn send_text(
        &self,
        chat: &Jid,
        text: &str,
        quoted: Option<&InboundMessage>,
    ) -> Result<MessageKey>;

    async fn send_reaction(&self, chat: &Jid, key: &MessageKey, emoji: &str) -> Result<()>;

    /// Mark messages as read.
    async fn read_messages(&self, keys: &[MessageKey]) -> Result<()>;

    async fn send_presence(&self, presence: Presence) -> Result<()>;

    /// Close the connection. Calling this on an already closed session is fine.
    async fn disconnect(&self) -> Result<()>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection. `auth` is `None` when the device still has to pair.
    async fn connect(&self, auth: Option<AuthState>, options: ConnectOptions)
        -> Result<Connection>;
}

pub struct Connection {
    pub session: Arc<dyn Session>,
    pub events: mpsc::Receiver<SessionEvent>,
}

/// Browser descriptor advertised when the device links.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Browser {
    pub platform: String,
    pub name: String,
}

impl Browser {
    pub fn mac_os(name: impl Into<String>) -> Self {
        Self {
            platform: "Mac OS".to_string(),
            name: name.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// The transport renders the pairing QR on its terminal when there are
    /// no credentials.
    pub print_pairing_code: bool,
    pub browser: Browser,
    pub sync_full_history: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionUpdate {
    Connecting,
    /// QR payload to scan from the phone's "Linked devices" screen.
    PairingCode(String),
    Open { own_id: Jid },
    Close { reason: CloseReason },
}

/// Acknowledgement handed back to the transport once an event is durable.
#[derive(Debug)]
pub struct Ack(Option<oneshot::Sender<()>>);

impl Ack {
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self(Some(tx)), rx)
    }

    /// For transports that don't wait for acknowledgements.
    pub fn none() -> Self {
        Self(None)
    }

    pub fn send(mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

#[derive(Debug)]
pub enum SessionEvent {
    Connection(ConnectionUpdate),
    CredentialsRotated { creds: CredentialState, ack: Ack },
    KeysUpdated { writes: Vec<KeyWrite>, ack: Ack },
    Messages(MessageBatch),
    Presence(PresenceUpdate),
}
