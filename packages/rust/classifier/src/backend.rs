//! OpenAI-compatible chat and embedding backend.
//!
//! Strategies talk to [`LlmBackend`] through [`MeteredBackend`], which checks
//! the [`CostTracker`] before each call and records token usage afterwards.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use personamap_shared::{AiConfig, PersonaMapError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::budget::CostTracker;

/// User-Agent string for API requests.
const USER_AGENT: &str = concat!("PersonaMap/", env!("CARGO_PKG_VERSION"));

/// Per-request timeout for model calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// One chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// A chat completion request, without the model name.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Chat completion text and the tokens it cost.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub total_tokens: u32,
}

/// An embedding vector and the tokens it cost.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub total_tokens: u32,
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponseRaw {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Message,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Serialize)]
struct EmbeddingBody<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponseRaw {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

// ---------------------------------------------------------------------------
// LlmBackend
// ---------------------------------------------------------------------------

/// A language-model service able to chat and embed text.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> Result<Completion>;

    async fn embed(&self, text: &str) -> Result<Embedding>;
}

/// REST client for an OpenAI-compatible API.
pub struct OpenAiBackend {
    http: Client,
    api_key: String,
    base_url: String,
    chat_model: String,
    embedding_model: String,
}

impl OpenAiBackend {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        chat_model: impl Into<String>,
        embedding_model: impl Into<String>,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PersonaMapError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            chat_model: chat_model.into(),
            embedding_model: embedding_model.into(),
        })
    }

    /// Build from `[ai]` config, reading the key from its env var.
    pub fn from_config(config: &AiConfig) -> Result<Self> {
        let api_key = config.api_key().ok_or_else(|| {
            PersonaMapError::config(format!(
                "API key env var '{}' is not set",
                config.api_key_env
            ))
        })?;
        Self::new(
            api_key,
            &config.api_base_url,
            &config.chat_model,
            &config.embedding_model,
        )
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let response = self
            .http
            .post(format!("{}/{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, path, "model API request failed");
                PersonaMapError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(%status, error = %error_text, path, "model API error");
            return Err(PersonaMapError::Classification(format!(
                "model API error {status}: {error_text}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    async fn chat(&self, request: &ChatRequest) -> Result<Completion> {
        let start = std::time::Instant::now();
        let body = ChatBody {
            model: &self.chat_model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let raw: ChatResponseRaw = self
            .post("chat/completions", &body)
            .await?
            .json()
            .await
            .map_err(|e| PersonaMapError::parse(format!("chat response: {e}")))?;

        let content = raw
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| PersonaMapError::Classification("empty chat response".into()))?;

        debug!(
            model = %self.chat_model,
            duration_ms = start.elapsed().as_millis() as u64,
            "chat completion"
        );

        Ok(Completion {
            content,
            total_tokens: raw.usage.map(|u| u.total_tokens).unwrap_or(0),
        })
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let body = EmbeddingBody {
            model: &self.embedding_model,
            input: text,
        };

        let raw: EmbeddingResponseRaw = self
            .post("embeddings", &body)
            .await?
            .json()
            .await
            .map_err(|e| PersonaMapError::parse(format!("embedding response: {e}")))?;

        let total_tokens = raw.usage.map(|u| u.total_tokens).unwrap_or(0);
        let vector = raw
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| PersonaMapError::Classification("empty embedding response".into()))?;

        Ok(Embedding {
            vector,
            total_tokens,
        })
    }
}

// ---------------------------------------------------------------------------
// MeteredBackend
// ---------------------------------------------------------------------------

/// A backend guarded by a spending budget.
pub struct MeteredBackend {
    backend: Arc<dyn LlmBackend>,
    budget: Arc<CostTracker>,
}

impl MeteredBackend {
    pub fn new(backend: Arc<dyn LlmBackend>, budget: Arc<CostTracker>) -> Self {
        Self { backend, budget }
    }

    pub fn budget(&self) -> &CostTracker {
        &self.budget
    }

    pub async fn chat(&self, request: &ChatRequest) -> Result<Completion> {
        self.budget.check()?;
        let completion = self.backend.chat(request).await?;
        self.budget.record(completion.total_tokens);
        Ok(completion)
    }

    pub async fn embed(&self, text: &str) -> Result<Embedding> {
        self.budget.check()?;
        let embedding = self.backend.embed(text).await?;
        self.budget.record(embedding.total_tokens);
        Ok(embedding)
    }
}
