//! Chat completion client.
//!
//! Requests go to an OpenAI-compatible `chat/completions` endpoint (OpenRouter
//! by default) with a bearer token. The system prompt is sent as a list of
//! text blocks so it can be marked for prompt caching.
//!
//! Failures are never retried here: a non-success status is returned to the
//! caller as [`ChatError::Api`] with the status code and the raw body.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ApiConfig;
use crate::error::ChatError;
use crate::models::ConversationMessage;
use crate::usage::Usage;

const PROMPT_CACHING_BETA: &str = "prompt-caching-2024-07-31";

const WEB_SEARCH_HINT: &str = "You can search the web for real-time information. \
If you need up-to-date information, tell the user you are searching.";

/// Request body for `POST chat/completions`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<ConversationMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<Vec<SystemBlock>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemBlock {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheControl {
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl ChatRequest {
    /// Build a request carrying `messages` and, when non-blank, the system
    /// prompt. With `cache` set the system block is marked ephemeral.
    pub fn new(
        api: &ApiConfig,
        messages: Vec<ConversationMessage>,
        system_prompt: &str,
        cache: bool,
    ) -> Self {
        let system_prompt = system_prompt.trim();
        let system = if system_prompt.is_empty() {
            None
        } else {
            Some(vec![SystemBlock {
                kind: "text",
                text: system_prompt.to_string(),
                cache_control: cache.then_some(CacheControl { kind: "ephemeral" }),
            }])
        };

        Self {
            model: api.model.clone(),
            max_tokens: api.max_tokens,
            messages,
            system,
        }
    }

    /// Append the uncached web search hint after any system prompt block.
    pub fn with_web_search(mut self, enabled: bool) -> Self {
        if enabled {
            self.system.get_or_insert_with(Vec::new).push(SystemBlock {
                kind: "text",
                text: WEB_SEARCH_HINT.to_string(),
                cache_control: None,
            });
        }
        self
    }

    pub fn wants_cache(&self) -> bool {
        self.system
            .as_ref()
            .is_some_and(|blocks| blocks.iter().any(|b| b.cache_control.is_some()))
    }
}

/// Parsed completion: reply text plus usage when the API reported it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub content: String,
    pub usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: Option<String>,
}

/// Parse a successful response body.
pub fn parse_response(body: &str) -> Result<ChatReply, ChatError> {
    let parsed: ApiResponse =
        serde_json::from_str(body).map_err(|e| ChatError::Decode(e.to_string()))?;

    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| ChatError::Decode("missing choices[0].message.content".to_string()))?;

    Ok(ChatReply {
        content,
        usage: parsed.usage,
    })
}

/// Anything that can carry a [`ChatRequest`] to a model and back.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn complete(&self, api_key: &str, request: &ChatRequest) -> Result<ChatReply, ChatError>;
}

/// HTTP transport backed by `reqwest`.
pub struct HttpTransport {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(api: &ApiConfig) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(api.timeout_secs))
            .build()?;
        Ok(Self {
            endpoint: api.endpoint.clone(),
            client,
        })
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn complete(&self, api_key: &str, request: &ChatRequest) -> Result<ChatReply, ChatError> {
        debug!(
            endpoint = %self.endpoint,
            model = %request.model,
            messages = request.messages.len(),
            "sending chat request"
        );

        let mut builder = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json");
        if request.wants_cache() {
            builder = builder.header("anthropic-beta", PROMPT_CACHING_BETA);
        }

        let response = builder.json(request).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "chat API returned an error");
            return Err(ChatError::Api {
                status: status.as_u16(),
                body,
            });
        }

        parse_response(&body)
    }
}
