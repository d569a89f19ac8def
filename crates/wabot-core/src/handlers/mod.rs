//! Built-in message handlers.
//!
//! Registration order is fixed: read-state handlers first, then handlers that
//! reply.

use std::sync::Arc;

use crate::{config::Config, dispatcher::EventDispatcher, model::ModelClient};

mod ai;
mod menu;
mod status;

pub use ai::{AiReplyHandler, AI_FAILED, AI_PREFIX, AI_UNAVAILABLE, THINKING_REACTION};
pub use menu::{MenuHandler, MENU_COMMAND, MENU_TEXT};
pub use status::StatusReadHandler;

/// The bot's handler chain: status-read, AI reply, menu.
///
/// `model` is `None` when no `GEMINI_API_KEY` is configured; the AI handler
/// then answers with a fixed notice instead of failing startup.
pub fn default_dispatcher(cfg: &Config, model: Option<Arc<dyn ModelClient>>) -> EventDispatcher {
    EventDispatcher::new()
        .with_handler(Arc::new(StatusReadHandler))
        .with_handler(Arc::new(AiReplyHandler::new(model, cfg.ai_timeout)))
        .with_handler(Arc::new(MenuHandler))
}
