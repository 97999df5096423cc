//! Language-model backends.

pub mod openai;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("empty response from {0}")]
    Empty(String),
}

/// A single-turn chat completion backend.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn provider(&self) -> &str;

    fn model_name(&self) -> &str;

    /// Returns the assistant message for `prompt` under `system`.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ProviderError>;
}
