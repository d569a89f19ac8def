use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    dispatcher::Handler, domain::InboundMessage, errors::Error, model::ModelClient,
    transport::Session, Result,
};

/// Command prefix, matched case-insensitively.
pub const AI_PREFIX: &str = ",ai ";

pub const THINKING_REACTION: &str = "🧠";
pub const AI_UNAVAILABLE: &str = "❌ API Key not found.";
pub const AI_FAILED: &str = "Error connecting to AI.";

/// `,ai <prompt>`: ask the model and reply with its answer.
pub struct AiReplyHandler {
    model: Option<Arc<dyn ModelClient>>,
    timeout: Duration,
}

impl AiReplyHandler {
    pub fn new(model: Option<Arc<dyn ModelClient>>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    async fn ask(&self, model: &dyn ModelClient, prompt: &str) -> Result<String> {
        match tokio::time::timeout(self.timeout, model.generate(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Ai(format!(
                "{} did not answer within {:?}",
                model.model_name(),
                self.timeout
            ))),
        }
    }
}

/// The prompt following the `,ai ` prefix, if the text starts with it.
pub fn extract_prompt(text: &str) -> Option<&str> {
    let head = text.get(..AI_PREFIX.len())?;
    if !head.eq_ignore_ascii_case(AI_PREFIX) {
        return None;
    }
    Some(&text[AI_PREFIX.len()..])
}

#[async_trait]
impl Handler for AiReplyHandler {
    fn name(&self) -> &'static str {
        "ai-reply"
    }

    async fn handle(&self, session: &dyn Session, msg: &InboundMessage) -> Result<()> {
        let Some(prompt) = extract_prompt(msg.text()) else {
            return Ok(());
        };
        let chat = msg.chat();

        let Some(model) = self.model.as_deref() else {
            session.send_text(chat, AI_UNAVAILABLE, Some(msg)).await?;
            return Ok(());
        };

        session
            .send_reaction(chat, &msg.key, THINKING_REACTION)
            .await?;

        let reply = match self.ask(model, prompt).await {
            Ok(text) => {
                info!(chat = %chat, model = model.model_name(), "model replied");
                text
            }
            Err(e) => {
                warn!(chat = %chat, error = %e, "model request failed");
                AI_FAILED.to_string()
            }
        };

        session.send_text(chat, &reply, Some(msg)).await?;
        Ok(())
    }
}
