use super::{ChatProvider, ProviderError};
use crate::models::{ChatMessage, ChatRequest, ChatResponse};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Any endpoint speaking the OpenAI `/chat/completions` dialect.
#[derive(Clone)]
pub struct OpenAiCompatProvider {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
    max_tokens: Option<usize>,
    temperature: Option<f32>,
}

impl OpenAiCompatProvider {
    /// `timeout` bounds the whole request; it is independent of the
    /// notification channel timeouts.
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            client,
            max_tokens: Some(1024),
            temperature: Some(0.2),
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatProvider {
    fn provider(&self) -> &str {
        "openai-compat"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ProviderError> {
        let req = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(prompt)],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        tracing::debug!(
            model = %self.model,
            prompt_length = prompt.len(),
            "Calling chat completion API"
        );

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Chat completion request failed");
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let chat_resp: ChatResponse = resp.json().await?;
        tracing::debug!(usage = ?chat_resp.usage, "Chat completion received");

        chat_resp
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ProviderError::Empty(self.model.clone()))
    }
}
