use std::fmt;

use serde::{Deserialize, Serialize};

/// Address of the status broadcast chat.
pub const STATUS_BROADCAST: &str = "status@broadcast";

/// Server suffix for individual user addresses.
pub const USER_SERVER: &str = "s.whatsapp.net";

/// Network address (`user[:device]@server`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Jid(pub String);

impl Jid {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// User part without the device suffix.
    pub fn user(&self) -> &str {
        let local = self.0.split('@').next().unwrap_or("");
        local.split(':').next().unwrap_or("")
    }

    pub fn server(&self) -> &str {
        self.0.split_once('@').map(|(_, s)| s).unwrap_or("")
    }

    pub fn is_status_broadcast(&self) -> bool {
        self.0 == STATUS_BROADCAST
    }

    /// The device-less chat address for this identity.
    ///
    /// A linked device logs in as `123:7@s.whatsapp.net`; messages to the
    /// account itself go to `123@s.whatsapp.net`.
    pub fn to_user_chat(&self) -> Jid {
        Jid(format!("{}@{USER_SERVER}", self.user()))
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque key identifying a message within its chat.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageKey {
    pub remote_jid: Jid,
    #[serde(default)]
    pub from_me: bool,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<Jid>,
}

/// Message payload as far as the bot cares about it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageContent {
    /// Plain text message.
    Conversation { text: String },
    /// Text with link preview, quote or mentions.
    ExtendedText { text: String },
    /// Anything else (media, reactions, stickers). No text is extracted.
    Other { message_type: String },
}

impl MessageContent {
    pub fn text(&self) -> &str {
        match self {
            MessageContent::Conversation { text } | MessageContent::ExtendedText { text } => text,
            MessageContent::Other { .. } => "",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub key: MessageKey,
    #[serde(default)]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl InboundMessage {
    pub fn chat(&self) -> &Jid {
        &self.key.remote_jid
    }

    pub fn is_from_me(&self) -> bool {
        self.key.from_me
    }

    pub fn has_content(&self) -> bool {
        self.content.is_some()
    }

    /// Message text, or `""` for bodies without text.
    pub fn text(&self) -> &str {
        self.content.as_ref().map(|c| c.text()).unwrap_or("")
    }
}

/// How a batch of messages reached us.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Real-time delivery.
    #[serde(alias = "notify")]
    Live,
    /// History replayed after (re)connecting.
    #[serde(alias = "append")]
    Backfill,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBatch {
    pub mode: DeliveryMode,
    pub messages: Vec<InboundMessage>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Available,
    Unavailable,
    Composing,
    Recording,
    Paused,
}

impl Presence {
    pub fn as_str(self) -> &'static str {
        match self {
            Presence::Available => "available",
            Presence::Unavailable => "unavailable",
            Presence::Composing => "composing",
            Presence::Recording => "recording",
            Presence::Paused => "paused",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub chat: Jid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<Jid>,
    pub presence: Presence,
}

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CloseReason {
    ConnectionClosed,
    ConnectionLost,
    ConnectionReplaced,
    LoggedOut,
    BadSession,
    RestartRequired,
    MultideviceMismatch,
    Forbidden,
    Unavailable,
    Other(u16),
}

impl CloseReason {
    pub fn from_status_code(code: u16) -> Self {
        match code {
            428 => CloseReason::ConnectionClosed,
            408 => CloseReason::ConnectionLost,
            440 => CloseReason::ConnectionReplaced,
            401 => CloseReason::LoggedOut,
            500 => CloseReason::BadSession,
            515 => CloseReason::RestartRequired,
            411 => CloseReason::MultideviceMismatch,
            403 => CloseReason::Forbidden,
            503 => CloseReason::Unavailable,
            other => CloseReason::Other(other),
        }
    }

    pub fn status_code(self) -> u16 {
        match self {
            CloseReason::ConnectionClosed => 428,
            CloseReason::ConnectionLost => 408,
            CloseReason::ConnectionReplaced => 440,
            CloseReason::LoggedOut => 401,
            CloseReason::BadSession => 500,
            CloseReason::RestartRequired => 515,
            CloseReason::MultideviceMismatch => 411,
            CloseReason::Forbidden => 403,
            CloseReason::Unavailable => 503,
            CloseReason::Other(code) => code,
        }
    }

    /// Only an explicit logout invalidates the credentials.
    pub fn is_terminal(self) -> bool {
        matches!(self, CloseReason::LoggedOut)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CloseReason::ConnectionClosed => "connection closed",
            CloseReason::ConnectionLost => "connection lost",
            CloseReason::ConnectionReplaced => "connection replaced",
            CloseReason::LoggedOut => "logged out",
            CloseReason::BadSession => "bad session",
            CloseReason::RestartRequired => "restart required",
            CloseReason::MultideviceMismatch => "multi-device mismatch",
            CloseReason::Forbidden => "forbidden",
            CloseReason::Unavailable => "service unavailable",
            CloseReason::Other(_) => "unknown",
        };
        write!(f, "{name} ({})", self.status_code())
    }
}
