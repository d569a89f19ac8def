use async_trait::async_trait;

use crate::Result;

/// Generative model backend used by the `,ai` handler.
#[async_trait]
pub trait ModelClient: Send + Sync {
    fn model_name(&self) -> &str;

    /// Produce a reply for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String>;
}
