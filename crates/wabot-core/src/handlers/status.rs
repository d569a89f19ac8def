use async_trait::async_trait;
use tracing::info;

use crate::{dispatcher::Handler, domain::InboundMessage, transport::Session, Result};

/// Marks every status broadcast as viewed. Never replies.
pub struct StatusReadHandler;

#[async_trait]
impl Handler for StatusReadHandler {
    fn name(&self) -> &'static str {
        "status-read"
    }

    async fn handle(&self, session: &dyn Session, msg: &InboundMessage) -> Result<()> {
        if !msg.chat().is_status_broadcast() {
            return Ok(());
        }

        session.read_messages(std::slice::from_ref(&msg.key)).await?;
        let poster = msg
            .key
            .participant
            .as_ref()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        info!(from = %poster, "status viewed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{Jid, MessageContent, STATUS_BROADCAST},
        testing::{text_message, FakeSession, Outbound},
    };

    #[tokio::test]
    async fn marks_status_broadcast_read_without_replying() {
        let session = FakeSession::default();
        let mut msg = text_message(STATUS_BROADCAST, "S1", "");
        msg.key.participant = Some(Jid::new("628@s.whatsapp.net"));
        msg.content = Some(MessageContent::Other {
            message_type: "imageMessage".to_string(),
        });

        StatusReadHandler.handle(&session, &msg).await.unwrap();

        assert_eq!(
            session.outbound(),
            vec![Outbound::Read {
                ids: vec!["S1".to_string()]
            }]
        );
    }

    #[tokio::test]
    async fn ignores_other_chats() {
        let session = FakeSession::default();
        let msg = text_message("628@s.whatsapp.net", "M1", "hello");

        StatusReadHandler.handle(&session, &msg).await.unwrap();

        assert!(session.outbound().is_empty());
    }
}
