//! In-crate fakes shared by unit tests.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::{
    domain::{InboundMessage, Jid, MessageContent, MessageKey, Presence},
    errors::Error,
    transport::Session,
    Result,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    Text {
        chat: Jid,
        text: String,
        quoted: Option<String>,
    },
    Reaction {
        chat: Jid,
        key_id: String,
        emoji: String,
    },
    Read {
        ids: Vec<String>,
    },
    Presence(Presence),
}

#[derive(Default)]
pub struct FakeSession {
    outbound: Mutex<Vec<Outbound>>,
    next_id: AtomicUsize,
    fail_sends: AtomicBool,
    disconnects: AtomicUsize,
    /// When set, `send_text` waits for a permit before recording.
    text_gate: Option<Arc<Semaphore>>,
}

impl FakeSession {
    pub fn failing() -> Self {
        let s = Self::default();
        s.fail_sends.store(true, Ordering::SeqCst);
        s
    }

    /// A session whose text sends block until `gate` hands out permits.
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            text_gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn outbound(&self) -> Vec<Outbound> {
        self.outbound.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.outbound()
            .into_iter()
            .filter_map(|o| match o {
                Outbound::Text { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    fn record(&self, o: Outbound) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        self.outbound.lock().unwrap().push(o);
        Ok(())
    }
}

#[async_trait]
impl Session for FakeSession {
    async fn send_text(
        &self,
        chat: &Jid,
        text: &str,
        quoted: Option<&InboundMessage>,
    ) -> Result<MessageKey> {
        if let Some(gate) = &self.text_gate {
            let _permit = gate.acquire().await.map_err(|_| Error::NotConnected)?;
        }
        self.record(Outbound::Text {
            chat: chat.clone(),
            text: text.to_string(),
            quoted: quoted.map(|m| m.key.id.clone()),
        })?;
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(MessageKey {
            remote_jid: chat.clone(),
            from_me: true,
            id: format!("OUT{n}"),
            participant: None,
        })
    }

    async fn send_reaction(&self, chat: &Jid, key: &MessageKey, emoji: &str) -> Result<()> {
        self.record(Outbound::Reaction {
            chat: chat.clone(),
            key_id: key.id.clone(),
            emoji: emoji.to_string(),
        })
    }

    async fn read_messages(&self, keys: &[MessageKey]) -> Result<()> {
        self.record(Outbound::Read {
            ids: keys.iter().map(|k| k.id.clone()).collect(),
        })
    }

    async fn send_presence(&self, presence: Presence) -> Result<()> {
        self.record(Outbound::Presence(presence))
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn text_message(chat: &str, id: &str, text: &str) -> InboundMessage {
    InboundMessage {
        key: MessageKey {
            remote_jid: Jid::new(chat),
            from_me: false,
            id: id.to_string(),
            participant: None,
        },
        content: Some(MessageContent::Conversation {
            text: text.to_string(),
        }),
        push_name: Some("Tester".to_string()),
        timestamp: Some(1_700_000_000),
    }
}
