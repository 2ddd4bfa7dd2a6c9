use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{Backend, Provider};
use crate::errors::{ServiceError, ServiceResult};

/// Chat completions client. One system message, one user message.
pub struct OpenAIProvider {
    client: Client,
    api_base: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

impl OpenAIProvider {
    pub fn new(api_base: String, api_key: Option<String>, timeout: Duration) -> ServiceResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Transport(format!("http client: {e}")))?;
        Ok(Self { client, api_base, api_key })
    }

    fn url(&self) -> String {
        format!("{}/v1/chat/completions", self.api_base.trim_end_matches('/'))
    }
}

/// Connection failures and timeouts get one more attempt; anything the
/// provider actually answered does not.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout()
}

#[async_trait]
impl Provider for OpenAIProvider {
    async fn generate(&self, system: &str, user: &str, backend: &Backend) -> ServiceResult<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ServiceError::Transport("OPENAI_API_KEY is not set".into()))?;

        let mut body = json!({
            "model": backend.id,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ]
        });
        if let Some(t) = backend.temperature {
            body["temperature"] = json!(t);
        }

        let url = self.url();
        tracing::debug!(%url, model = backend.id, "sending chat completion");

        let mut attempt = 0;
        let resp = loop {
            attempt += 1;
            match self.client.post(&url).bearer_auth(api_key).json(&body).send().await {
                Ok(r) => break r,
                Err(e) if attempt == 1 && is_transient(&e) => {
                    tracing::warn!(error = %e, "transient provider failure, retrying once");
                }
                Err(e) => return Err(ServiceError::Transport(format!("request failed: {e}"))),
            }
        };

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ServiceError::Transport(format!("read body failed: {e}")))?;
        if !status.is_success() {
            return Err(ServiceError::Transport(format!("OpenAI API error ({status}): {text}")));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| ServiceError::Transport(format!("failed to parse OpenAI response: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::Transport("OpenAI response had no choices".into()))?
            .message
            .content
            .unwrap_or_default();

        Ok(content.trim().to_string())
    }
}
