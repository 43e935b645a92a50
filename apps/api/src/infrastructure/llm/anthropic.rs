// Anthropic Messages API adapter
//
// Implements `ReasoningOracle` over a single-turn user message. Only the
// first text block of the reply is returned.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agents::errors::{AgentError, AgentResult};
use crate::agents::oracle::ReasoningOracle;

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicOracle {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [UserMessage<'a>; 1],
}

#[derive(Serialize)]
struct UserMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicOracle {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url: MESSAGES_URL.to_string(),
        }
    }

    /// Point the adapter at a different endpoint (proxies, local fakes)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ReasoningOracle for AnthropicOracle {
    async fn complete(&self, prompt: &str, max_output: u32) -> AgentResult<String> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: max_output,
            messages: [UserMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| AgentError::Oracle(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, model = %self.model, "Oracle request rejected");
            return Err(AgentError::Oracle(match status.as_u16() {
                401 | 403 => format!("authentication failed: {}", body),
                429 => "rate limited".to_string(),
                _ => format!("HTTP {}: {}", status, body),
            }));
        }

        let reply: MessagesResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Oracle(format!("unreadable response: {}", e)))?;

        if reply.stop_reason.as_deref() == Some("max_tokens") {
            tracing::debug!(max_output, "Oracle reply truncated at max_tokens");
        }

        reply
            .content
            .into_iter()
            .find_map(|block| block.text)
            .ok_or_else(|| AgentError::Oracle("response contained no text".to_string()))
    }
}
