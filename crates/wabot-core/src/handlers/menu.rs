use async_trait::async_trait;

use crate::{dispatcher::Handler, domain::InboundMessage, transport::Session, Result};

pub const MENU_COMMAND: &str = ",menu";

pub const MENU_TEXT: &str = "*🤖 BOT MENU*

1. *,ai <text>* - Ask AI
2. *,status* - Check status
3. *,ping* - Ping bot

_Powered by Gemini 2.5_";

/// Replies to `,menu` (exact match after trimming) with the help text.
pub struct MenuHandler;

#[async_trait]
impl Handler for MenuHandler {
    fn name(&self) -> &'static str {
        "menu"
    }

    async fn handle(&self, session: &dyn Session, msg: &InboundMessage) -> Result<()> {
        if msg.text().trim() != MENU_COMMAND {
            return Ok(());
        }
        session.send_text(msg.chat(), MENU_TEXT, Some(msg)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::Jid,
        testing::{text_message, FakeSession, Outbound},
    };

    async fn reply_for(text: &str) -> Vec<Outbound> {
        let session = FakeSession::default();
        let msg = text_message("628@s.whatsapp.net", "M1", text);
        MenuHandler.handle(&session, &msg).await.unwrap();
        session.outbound()
    }

    #[tokio::test]
    async fn exact_command_replies_with_menu_quoting_original() {
        assert_eq!(
            reply_for(",menu").await,
            vec![Outbound::Text {
                chat: Jid::new("628@s.whatsapp.net"),
                text: MENU_TEXT.to_string(),
                quoted: Some("M1".to_string()),
            }]
        );
    }

    #[tokio::test]
    async fn surrounding_whitespace_still_matches() {
        assert_eq!(reply_for("  ,menu  ").await, reply_for(",menu").await);
    }

    #[tokio::test]
    async fn near_misses_are_ignored() {
        for text in [",MENU", ",menu please", "menu", ", menu", ""] {
            assert!(reply_for(text).await.is_empty(), "{text:?}");
        }
    }
}
