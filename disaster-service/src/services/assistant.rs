//! Chat assistant backends.
//!
//! The production backend speaks the OpenAI chat-completions protocol, which
//! both hosted APIs and local model runtimes expose.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use utoipa::ToSchema;

use crate::config::AssistantConfig;
use crate::services::error::ServiceError;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Assistant returned no content")]
    EmptyResponse,
}

impl From<ProviderError> for ServiceError {
    fn from(err: ProviderError) -> Self {
        metrics::counter!("assistant_errors_total").increment(1);
        ServiceError::Assistant(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssistantReply {
    pub content: String,
    pub model: String,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

#[async_trait]
pub trait AssistantProvider: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<AssistantReply, ProviderError>;

    fn model(&self) -> &str;
}

pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    api_key: Option<Secret<String>>,
    model: String,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: &AssistantConfig) -> Result<Self, anyhow::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl AssistantProvider for OpenAiCompatibleProvider {
    #[tracing::instrument(skip_all, fields(model = %self.model, messages = messages.len()))]
    async fn complete(&self, messages: &[ChatMessage]) -> Result<AssistantReply, ProviderError> {
        let request = CompletionRequest {
            model: &self.model,
            messages,
            stream: false,
        };

        let mut builder = self.client.post(self.completions_url()).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                return Err(ProviderError::RateLimited);
            }

            return Err(ProviderError::ApiError(format!(
                "Assistant API error {}: {}",
                status, error_text
            )));
        }

        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ApiError(format!("Failed to parse response: {}", e)))?;

        parse_reply(body, &self.model)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

fn parse_reply(body: CompletionResponse, requested_model: &str) -> Result<AssistantReply, ProviderError> {
    let content = body
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or(ProviderError::EmptyResponse)?;

    let (prompt_tokens, completion_tokens) = body
        .usage
        .map(|u| (u.prompt_tokens, u.completion_tokens))
        .unwrap_or((None, None));

    Ok(AssistantReply {
        content,
        model: body.model.unwrap_or_else(|| requested_model.to_string()),
        prompt_tokens,
        completion_tokens,
    })
}

/// Canned assistant that records every conversation it is sent.
pub struct MockAssistant {
    reply: String,
    conversations: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockAssistant {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            conversations: Mutex::new(Vec::new()),
        }
    }

    pub fn conversations(&self) -> Vec<Vec<ChatMessage>> {
        self.conversations.lock().clone()
    }
}

#[async_trait]
impl AssistantProvider for MockAssistant {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<AssistantReply, ProviderError> {
        self.conversations.lock().push(messages.to_vec());
        Ok(AssistantReply {
            content: self.reply.clone(),
            model: "mock".to_string(),
            prompt_tokens: None,
            completion_tokens: None,
        })
    }

    fn model(&self) -> &str {
        "mock"
    }
}
