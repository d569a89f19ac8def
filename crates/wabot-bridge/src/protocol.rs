//! JSON Lines protocol spoken with the bridge process.
//!
//! Every line on the bridge's stdin is one [`BridgeCommand`]; every line on
//! its stdout is one [`BridgeEvent`]. Both are tagged by `type`.

use serde::{Deserialize, Serialize};
use tracing::warn;
use wabot_core::{
    credentials::{AuthState, CredentialState, KeyWrite},
    domain::{CloseReason, DeliveryMode, InboundMessage, Jid, MessageKey, Presence, PresenceUpdate},
    transport::{ConnectOptions, ConnectionUpdate},
};

/// Commands sent from the bot to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeCommand {
    /// First line after spawn: start the socket with this identity.
    Connect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auth: Option<AuthState>,
        options: ConnectOptions,
    },
    SendText {
        request_id: String,
        chat: Jid,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        quoted: Option<InboundMessage>,
    },
    SendReaction {
        request_id: String,
        chat: Jid,
        key: MessageKey,
        emoji: String,
    },
    ReadMessages {
        request_id: String,
        keys: Vec<MessageKey>,
    },
    SendPresence {
        request_id: String,
        presence: Presence,
    },
    /// The credential or key update with this id is persisted.
    Ack { ack_id: u64 },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Connecting,
    Open,
    Close,
}

/// Events emitted by the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    Connection {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<LinkState>,
        /// Pairing payload to show the operator.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        qr: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        own_id: Option<Jid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
    },
    CredsUpdate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack_id: Option<u64>,
        creds: CredentialState,
    },
    KeysUpdate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack_id: Option<u64>,
        writes: Vec<KeyWrite>,
    },
    MessagesUpsert {
        mode: DeliveryMode,
        #[serde(default)]
        messages: Vec<InboundMessage>,
    },
    PresenceUpdate(PresenceUpdate),
    /// Reply to a command carrying `request_id`.
    Result {
        request_id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },
    /// Diagnostic line from the bridge's own logger.
    Log {
        #[serde(default)]
        level: String,
        message: String,
    },
}

/// Translate a bridge `connection` event into session updates.
///
/// A pairing payload and a state change may arrive on the same line; the
/// pairing code is reported first. A close without a status code is
/// treated as a lost connection.
pub fn connection_updates(
    state: Option<LinkState>,
    qr: Option<String>,
    own_id: Option<Jid>,
    status_code: Option<u16>,
) -> Vec<ConnectionUpdate> {
    let mut updates = Vec::new();
    if let Some(code) = qr {
        updates.push(ConnectionUpdate::PairingCode(code));
    }
    match state {
        Some(LinkState::Connecting) => updates.push(ConnectionUpdate::Connecting),
        Some(LinkState::Open) => match own_id {
            Some(own_id) => updates.push(ConnectionUpdate::Open { own_id }),
            None => warn!("bridge reported open without an own id; ignoring"),
        },
        Some(LinkState::Close) => {
            let reason = status_code
                .map(CloseReason::from_status_code)
                .unwrap_or(CloseReason::ConnectionLost);
            updates.push(ConnectionUpdate::Close { reason });
        }
        None => {}
    }
    updates
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wabot_core::transport::Browser;

    #[test]
    fn parses_bridge_lines() {
        let ev: BridgeEvent = serde_json::from_str(
            r#"{"type":"connection","state":"close","status_code":401}"#,
        )
        .unwrap();
        assert_eq!(
            ev,
            BridgeEvent::Connection {
                state: Some(LinkState::Close),
                qr: None,
                own_id: None,
                status_code: Some(401),
            }
        );

        let ev: BridgeEvent = serde_json::from_value(json!({
            "type": "messages_upsert",
            "mode": "notify",
            "messages": [{
                "key": { "remote_jid": "status@broadcast", "id": "S1", "participant": "628@s.whatsapp.net" },
                "content": { "kind": "conversation", "text": "hi" }
            }]
        }))
        .unwrap();
        match ev {
            BridgeEvent::MessagesUpsert { mode, messages } => {
                assert_eq!(mode, DeliveryMode::Live);
                assert_eq!(messages.len(), 1);
                assert!(messages[0].chat().is_status_broadcast());
                assert!(!messages[0].is_from_me());
                assert_eq!(messages[0].text(), "hi");
            }
            other => panic!("unexpected event {other:?}"),
        }

        let ev: BridgeEvent = serde_json::from_value(json!({
            "type": "presence_update",
            "chat": "628@s.whatsapp.net",
            "presence": "composing"
        }))
        .unwrap();
        assert!(matches!(
            ev,
            BridgeEvent::PresenceUpdate(PresenceUpdate { presence: Presence::Composing, .. })
        ));
    }

    #[test]
    fn commands_serialize_with_type_tag() {
        let v = serde_json::to_value(BridgeCommand::SendPresence {
            request_id: "req-3".to_string(),
            presence: Presence::Available,
        })
        .unwrap();
        assert_eq!(
            v,
            json!({ "type": "send_presence", "request_id": "req-3", "presence": "available" })
        );

        let v = serde_json::to_value(BridgeCommand::Connect {
            auth: None,
            options: ConnectOptions {
                print_pairing_code: true,
                browser: Browser::mac_os("SafariVybe"),
                sync_full_history: false,
            },
        })
        .unwrap();
        assert_eq!(v["type"], "connect");
        assert!(v.get("auth").is_none());
        assert_eq!(v["options"]["browser"]["platform"], "Mac OS");

        let v = serde_json::to_value(BridgeCommand::Ack { ack_id: 9 }).unwrap();
        assert_eq!(v, json!({ "type": "ack", "ack_id": 9 }));
        let v = serde_json::to_value(BridgeCommand::Shutdown).unwrap();
        assert_eq!(v, json!({ "type": "shutdown" }));
    }

    #[test]
    fn connection_updates_cover_every_state() {
        assert_eq!(
            connection_updates(Some(LinkState::Connecting), Some("QR".into()), None, None),
            vec![
                ConnectionUpdate::PairingCode("QR".to_string()),
                ConnectionUpdate::Connecting
            ]
        );
        assert_eq!(
            connection_updates(
                Some(LinkState::Open),
                None,
                Some(Jid::new("628:3@s.whatsapp.net")),
                None
            ),
            vec![ConnectionUpdate::Open {
                own_id: Jid::new("628:3@s.whatsapp.net")
            }]
        );
        assert!(connection_updates(Some(LinkState::Open), None, None, None).is_empty());
        assert_eq!(
            connection_updates(Some(LinkState::Close), None, None, Some(515)),
            vec![ConnectionUpdate::Close {
                reason: CloseReason::RestartRequired
            }]
        );
        assert_eq!(
            connection_updates(Some(LinkState::Close), None, None, None),
            vec![ConnectionUpdate::Close {
                reason: CloseReason::ConnectionLost
            }]
        );
        assert!(connection_updates(None, None, None, None).is_empty());
    }
}
