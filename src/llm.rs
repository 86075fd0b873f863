use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const GROQ_API_BASE: &str = "https://api.groq.com/openai/v1";

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} returned HTTP {status}: {body}")]
    Status {
        provider: Provider,
        status: u16,
        body: String,
    },

    #[error("{0} returned an empty completion")]
    EmptyCompletion(Provider),

    #[error("no API key configured for {0}")]
    MissingApiKey(Provider),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Groq,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::OpenAi => write!(f, "OpenAI"),
            Provider::Groq => write!(f, "Groq"),
        }
    }
}

/// Models offered for prompt writing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptModel {
    #[default]
    #[serde(rename = "gpt-3.5-turbo")]
    Gpt35Turbo,
    #[serde(rename = "gpt-4")]
    Gpt4,
    #[serde(rename = "llama3-8b")]
    Llama3_8b,
    #[serde(rename = "llama3-70b")]
    Llama3_70b,
    #[serde(rename = "mixtral-8x7b")]
    Mixtral8x7b,
}

impl PromptModel {
    pub const ALL: [PromptModel; 5] = [
        PromptModel::Gpt35Turbo,
        PromptModel::Gpt4,
        PromptModel::Llama3_8b,
        PromptModel::Llama3_70b,
        PromptModel::Mixtral8x7b,
    ];

    pub fn label(self) -> &'static str {
        match self {
            PromptModel::Gpt35Turbo => "gpt-3.5-turbo",
            PromptModel::Gpt4 => "gpt-4",
            PromptModel::Llama3_8b => "llama3-8b",
            PromptModel::Llama3_70b => "llama3-70b",
            PromptModel::Mixtral8x7b => "mixtral-8x7b",
        }
    }

    pub fn provider(self) -> Provider {
        match self {
            PromptModel::Gpt35Turbo | PromptModel::Gpt4 => Provider::OpenAi,
            _ => Provider::Groq,
        }
    }

    /// Model id sent on the wire.
    pub fn api_name(self) -> &'static str {
        match self {
            PromptModel::Llama3_8b => "llama3-8b-8192",
            PromptModel::Llama3_70b => "llama3-70b-8192",
            PromptModel::Mixtral8x7b => "mixtral-8x7b-32768",
            other => other.label(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: PromptModel,
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

/// Result of a completion call. A timeout is an expected outcome, not an error.
#[derive(Debug)]
pub enum LlmOutcome {
    Success(String),
    Timeout,
    Failed(LlmError),
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> LlmOutcome;
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// OpenAI-compatible `/chat/completions` client. Groq speaks the same protocol.
pub struct ChatClient {
    client: reqwest::Client,
    provider: Provider,
    base_url: String,
    api_key: String,
}

impl ChatClient {
    pub fn new(client: reqwest::Client, provider: Provider, base_url: String, api_key: String) -> Self {
        Self {
            client,
            provider,
            base_url,
            api_key,
        }
    }

    async fn send(&self, request: &ChatRequest) -> Result<String, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::MissingApiKey(self.provider));
        }

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = CompletionBody {
            model: request.model.api_name(),
            messages: vec![
                Message {
                    role: "system",
                    content: &request.system_prompt,
                },
                Message {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        debug!(
            "{} completion: model={} max_tokens={} temperature={}",
            self.provider,
            body.model,
            body.max_tokens,
            body.temperature
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::Status {
                provider: self.provider,
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let completion: CompletionResponse = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(LlmError::EmptyCompletion(self.provider))
    }
}

#[async_trait]
impl LanguageModel for ChatClient {
    async fn complete(&self, request: &ChatRequest) -> LlmOutcome {
        match self.send(request).await {
            Ok(text) => LlmOutcome::Success(text),
            Err(LlmError::Http(e)) if e.is_timeout() => {
                warn!("{} request timed out after {:?}", self.provider, request.timeout);
                LlmOutcome::Timeout
            }
            Err(e) => LlmOutcome::Failed(e),
        }
    }
}

/// Routes each request to the provider that serves its model.
pub struct LlmRouter {
    openai: Arc<dyn LanguageModel>,
    groq: Arc<dyn LanguageModel>,
}

impl LlmRouter {
    pub fn new(openai: Arc<dyn LanguageModel>, groq: Arc<dyn LanguageModel>) -> Self {
        Self { openai, groq }
    }

    pub fn for_model(&self, model: PromptModel) -> &dyn LanguageModel {
        match model.provider() {
            Provider::OpenAi => self.openai.as_ref(),
            Provider::Groq => self.groq.as_ref(),
        }
    }
}

#[async_trait]
impl LanguageModel for LlmRouter {
    async fn complete(&self, request: &ChatRequest) -> LlmOutcome {
        self.for_model(request.model).complete(request).await
    }
}
