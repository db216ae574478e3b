use crate::error::{EngineError, ProviderFault, Result};
use crate::models::TokenUsage;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: "granite-3-8b-instruct".to_string(),
            temperature: 0.3,
            max_tokens: 1_024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub finish_reason: String,
    pub usage: TokenUsage,
}

/// One increment of a streamed completion. The final chunk carries the
/// finish reason and usage counters.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    pub delta: String,
    pub done: bool,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

/// Turns a structured message list into model text, single-shot or
/// incrementally.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, messages: &[ChatMessage], params: &GenerationParams)
        -> Result<Completion>;

    /// Incremental delivery; the receiver yields partial chunks and is
    /// closed after a final chunk with `done = true`.
    async fn generate_stream(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<mpsc::Receiver<Result<StreamChunk>>>;

    async fn health_check(&self) -> bool;
}

/// Generation client against an OpenAI-compatible chat-completions
/// endpoint.
pub struct HttpGenerator {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: usize,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Deserialize, Default)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
    #[serde(default)]
    total_tokens: usize,
}

impl From<ApiUsage> for TokenUsage {
    fn from(value: ApiUsage) -> Self {
        Self {
            prompt_tokens: value.prompt_tokens,
            completion_tokens: value.completion_tokens,
            total_tokens: value.total_tokens,
        }
    }
}

impl HttpGenerator {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key,
        })
    }

    fn classify(error: &reqwest::Error) -> ProviderFault {
        if error.is_timeout() {
            ProviderFault::Timeout
        } else if error.is_connect() {
            ProviderFault::Network
        } else {
            ProviderFault::Other
        }
    }

    fn status_fault(status: reqwest::StatusCode) -> ProviderFault {
        match status.as_u16() {
            429 => ProviderFault::RateLimited,
            401 | 403 => ProviderFault::Auth,
            408 | 504 => ProviderFault::Timeout,
            _ => ProviderFault::Other,
        }
    }

    async fn send(&self, body: &ChatRequest<'_>) -> Result<ChatResponse> {
        let mut request = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|error| {
            EngineError::provider("generation", Self::classify(&error), error.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(EngineError::provider(
                "generation",
                Self::status_fault(status),
                format!("HTTP {status}: {details}"),
            ));
        }

        response.json::<ChatResponse>().await.map_err(|error| {
            EngineError::provider("generation", ProviderFault::Other, error.to_string())
        })
    }
}

#[async_trait]
impl GenerationProvider for HttpGenerator {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<Completion> {
        let body = ChatRequest {
            model: &params.model,
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            stream: false,
        };

        let parsed = self.send(&body).await?;
        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            EngineError::provider("generation", ProviderFault::Other, "empty choice list")
        })?;

        Ok(Completion {
            text: choice.message.content,
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
            usage: parsed.usage.unwrap_or_default().into(),
        })
    }

    async fn generate_stream(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<mpsc::Receiver<Result<StreamChunk>>> {
        // Single-shot under the hood; the full completion is delivered
        // as one content chunk followed by the terminal chunk, which
        // keeps the streaming contract uniform across providers.
        let completion = self.generate(messages, params).await?;
        let (sender, receiver) = mpsc::channel(2);

        let _ = sender
            .send(Ok(StreamChunk {
                delta: completion.text,
                done: false,
                finish_reason: None,
                usage: None,
            }))
            .await;
        let _ = sender
            .send(Ok(StreamChunk {
                delta: String::new(),
                done: true,
                finish_reason: Some(completion.finish_reason),
                usage: Some(completion.usage),
            }))
            .await;

        Ok(receiver)
    }

    async fn health_check(&self) -> bool {
        let mut request = self.client.get(format!("{}/v1/models", self.base_url));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_faults_are_classified() {
        assert_eq!(
            HttpGenerator::status_fault(reqwest::StatusCode::TOO_MANY_REQUESTS),
            ProviderFault::RateLimited
        );
        assert_eq!(
            HttpGenerator::status_fault(reqwest::StatusCode::UNAUTHORIZED),
            ProviderFault::Auth
        );
        assert_eq!(
            HttpGenerator::status_fault(reqwest::StatusCode::GATEWAY_TIMEOUT),
            ProviderFault::Timeout
        );
        assert_eq!(
            HttpGenerator::status_fault(reqwest::StatusCode::INTERNAL_SERVER_ERROR),
            ProviderFault::Other
        );
    }

    #[test]
    fn chat_message_constructors_set_roles() {
        assert_eq!(ChatMessage::system("s").role, MessageRole::System);
        assert_eq!(ChatMessage::user("u").role, MessageRole::User);
        assert_eq!(ChatMessage::assistant("a").role, MessageRole::Assistant);
    }
}
