//! Page-to-persona relevance scoring.
//!
//! This crate provides:
//! - [`RelevanceStrategy`] — the scoring seam, pure with respect to storage
//! - [`KeywordStrategy`], [`EmbeddingStrategy`], [`JudgeStrategy`] — base strategies
//! - [`HybridStrategy`], [`ValidationStrategy`] — composites over the above
//! - [`Classifier`] — resolves a strategy from `[ai]` config once per job and
//!   falls back to keyword scoring whenever the AI path fails

pub mod backend;
pub mod budget;
pub mod embedding;
pub mod hybrid;
pub mod judge;
pub mod keyword;
pub mod text;

use std::sync::Arc;

use async_trait::async_trait;
use personamap_shared::{
    AiConfig, ClassificationMode, CrawledPage, PersonaDefinition, PersonaScore, Result,
};
use tracing::{debug, instrument, warn};

pub use backend::{LlmBackend, MeteredBackend, OpenAiBackend};
pub use budget::CostTracker;
pub use embedding::{EmbeddingStrategy, cosine_similarity};
pub use hybrid::{HybridStrategy, ValidationStrategy};
pub use judge::JudgeStrategy;
pub use keyword::{KeywordStrategy, tokenize};

/// Scores a page against a set of personas.
///
/// Implementations return only personas above their own threshold, best
/// first, at most one score per persona.
#[async_trait]
pub trait RelevanceStrategy: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    async fn score(
        &self,
        page: &CrawledPage,
        personas: &[PersonaDefinition],
    ) -> Result<Vec<PersonaScore>>;
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// The strategy a job classifies with, plus its keyword fallback.
pub struct Classifier {
    mode: ClassificationMode,
    strategy: Box<dyn RelevanceStrategy>,
    fallback: KeywordStrategy,
    budget: Option<Arc<CostTracker>>,
}

impl Classifier {
    /// Keyword scoring only.
    pub fn keyword_only(threshold: f64) -> Self {
        Self {
            mode: ClassificationMode::Keyword,
            strategy: Box::new(KeywordStrategy::new(threshold)),
            fallback: KeywordStrategy::new(threshold),
            budget: None,
        }
    }

    /// Resolve the strategy for `config`, using the OpenAI-compatible backend
    /// for AI modes.
    pub fn from_config(config: &AiConfig) -> Result<Self> {
        let mode = config.effective_mode();
        if mode == ClassificationMode::Keyword {
            return Ok(Self::keyword_only(config.keyword_threshold));
        }
        let backend = Arc::new(OpenAiBackend::from_config(config)?);
        Ok(Self::with_backend(config, mode, backend))
    }

    /// Build `mode` on top of an explicit backend.
    pub fn with_backend(
        config: &AiConfig,
        mode: ClassificationMode,
        backend: Arc<dyn LlmBackend>,
    ) -> Self {
        let budget = Arc::new(CostTracker::from_config(config));
        let ai = Arc::new(MeteredBackend::new(backend, budget.clone()));
        let keyword = KeywordStrategy::new(config.keyword_threshold);

        let judge = || {
            JudgeStrategy::new(
                ai.clone(),
                config.judge_threshold,
                config.content_chunk_size,
                config.max_tokens,
                config.temperature,
            )
        };
        let embedding = || {
            EmbeddingStrategy::new(
                ai.clone(),
                config.embedding_threshold,
                config.content_chunk_size,
            )
        };

        let strategy: Box<dyn RelevanceStrategy> = match mode {
            ClassificationMode::Keyword => Box::new(keyword.clone()),
            ClassificationMode::Embedding => Box::new(embedding()),
            ClassificationMode::Judge => Box::new(judge()),
            ClassificationMode::Hybrid => {
                let ai_strategy: Box<dyn RelevanceStrategy> = if config.chat_model.trim().is_empty() {
                    Box::new(embedding())
                } else {
                    Box::new(judge())
                };
                Box::new(HybridStrategy::new(ai_strategy, keyword.clone()))
            }
            ClassificationMode::Validation => {
                Box::new(ValidationStrategy::new(judge(), keyword.clone()))
            }
        };

        Self {
            mode,
            strategy,
            fallback: keyword,
            budget: Some(budget),
        }
    }

    pub fn mode(&self) -> ClassificationMode {
        self.mode
    }

    /// Approximate (daily, monthly) AI spend, when an AI mode is active.
    pub fn spend(&self) -> Option<(f64, f64)> {
        self.budget.as_ref().map(|b| b.totals())
    }

    /// Score a page. Never fails: AI errors and budget breaches fall back to
    /// keyword scoring.
    #[instrument(skip_all, fields(url = %page.url, strategy = self.strategy.name()))]
    pub async fn classify(
        &self,
        page: &CrawledPage,
        personas: &[PersonaDefinition],
    ) -> Vec<PersonaScore> {
        if personas.is_empty() {
            return Vec::new();
        }

        match self.strategy.score(page, personas).await {
            Ok(scores) => {
                debug!(mapped = scores.len(), "page classified");
                scores
            }
            Err(e) => {
                warn!(error = %e, ai_failure = e.is_ai_failure(), "classification failed, using keyword fallback");
                self.fallback.score_all(page, personas)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;
    use personamap_shared::{JobId, PersonaMapError};

    use super::*;
    use crate::backend::{ChatRequest, Completion, Embedding};

    pub fn page(url: &str, title: Option<&str>, content: &str) -> CrawledPage {
        CrawledPage {
            id: "page-1".into(),
            job_id: JobId::new(),
            url: url.into(),
            title: title.map(str::to_string),
            meta_description: None,
            content: content.into(),
            word_count: content.split_whitespace().count() as u32,
            status_code: Some(200),
            content_hash: String::new(),
            crawled_at: Utc::now(),
            is_processed: false,
            processed_at: None,
            processing_error: None,
        }
    }

    pub fn persona(id: &str, title: &str, keywords: &[&str]) -> PersonaDefinition {
        PersonaDefinition {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            is_active: true,
        }
    }

    pub fn metered(backend: Arc<ScriptedBackend>) -> Arc<MeteredBackend> {
        Arc::new(MeteredBackend::new(
            backend,
            Arc::new(CostTracker::new(0.002, 10.0, 100.0)),
        ))
    }

    /// Canned backend: embeddings chosen by substring, one fixed chat reply.
    #[derive(Default)]
    pub struct ScriptedBackend {
        embeddings: Vec<(String, Vec<f32>)>,
        reply: Option<String>,
        fail: bool,
        embed_calls: AtomicUsize,
        chat_calls: AtomicUsize,
        last_prompt: Mutex<String>,
    }

    impl ScriptedBackend {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn embedding(mut self, needle: &str, vector: Vec<f32>) -> Self {
            self.embeddings.push((needle.into(), vector));
            self
        }

        pub fn chat_reply(mut self, reply: &str) -> Self {
            self.reply = Some(reply.into());
            self
        }

        pub fn embed_calls(&self) -> usize {
            self.embed_calls.load(Ordering::SeqCst)
        }

        pub fn chat_calls(&self) -> usize {
            self.chat_calls.load(Ordering::SeqCst)
        }

        pub fn last_prompt(&self) -> String {
            self.last_prompt.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmBackend for ScriptedBackend {
        async fn chat(&self, request: &ChatRequest) -> Result<Completion> {
            self.chat_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(last) = request.messages.last() {
                *self.last_prompt.lock().unwrap() = last.content.clone();
            }
            match (&self.reply, self.fail) {
                (Some(reply), false) => Ok(Completion {
                    content: reply.clone(),
                    total_tokens: 100,
                }),
                _ => Err(PersonaMapError::Classification("scripted failure".into())),
            }
        }

        async fn embed(&self, text: &str) -> Result<Embedding> {
            self.embed_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(PersonaMapError::Network("scripted failure".into()));
            }
            let vector = self
                .embeddings
                .iter()
                .find(|(needle, _)| text.contains(needle.as_str()))
                .map(|(_, v)| v.clone())
                .unwrap_or_else(|| vec![0.0, 0.0]);
            Ok(Embedding {
                vector,
                total_tokens: 10,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use personamap_shared::MappingMethod;
    use crate::test_support::{ScriptedBackend, page, persona};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CONTENT: &str =
        "alpha alpha alpha alpha alpha beta lorem ipsum dolor sit amet consectetur";

    fn personas() -> Vec<PersonaDefinition> {
        vec![
            persona("a", "Persona A", &["alpha", "beta"]),
            persona("b", "Persona B", &["gamma"]),
        ]
    }

    #[test]
    fn disabled_ai_resolves_to_keyword() {
        let config = AiConfig {
            enabled: false,
            mode: ClassificationMode::Judge,
            ..AiConfig::default()
        };
        let classifier = Classifier::from_config(&config).unwrap();
        assert_eq!(classifier.mode(), ClassificationMode::Keyword);
        assert!(classifier.spend().is_none());
    }

    #[tokio::test]
    async fn keyword_classification() {
        let classifier = Classifier::keyword_only(0.1);
        let scores = classifier
            .classify(&page("https://x.com/p", None, CONTENT), &personas())
            .await;
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].persona_id, "a");
    }

    #[tokio::test]
    async fn ai_failure_falls_back_to_keyword() {
        for mode in [
            ClassificationMode::Embedding,
            ClassificationMode::Judge,
            ClassificationMode::Hybrid,
        ] {
            let classifier = Classifier::with_backend(
                &AiConfig::default(),
                mode,
                Arc::new(ScriptedBackend::failing()),
            );
            let scores = classifier
                .classify(&page("https://x.com/p", None, CONTENT), &personas())
                .await;
            assert_eq!(scores.len(), 1, "mode {mode}");
            assert_eq!(scores[0].method, MappingMethod::Keyword, "mode {mode}");
        }
    }

    #[tokio::test]
    async fn budget_breach_falls_back_to_keyword() {
        let config = AiConfig {
            daily_cost_limit: 0.0,
            ..AiConfig::default()
        };
        let backend = Arc::new(ScriptedBackend::default().chat_reply(
            r#"{"analysis":[{"persona_title":"Persona B","confidence":90,"reasoning":"x"}]}"#,
        ));
        let classifier =
            Classifier::with_backend(&config, ClassificationMode::Judge, backend.clone());
        let p = page("https://x.com/p", None, CONTENT);

        // First call is within budget (nothing spent yet).
        let first = classifier.classify(&p, &personas()).await;
        assert_eq!(first[0].method, MappingMethod::AiJudge);

        let second = classifier.classify(&p, &personas()).await;
        assert_eq!(second[0].method, MappingMethod::Keyword);
        assert_eq!(backend.chat_calls(), 1);
    }

    #[tokio::test]
    async fn hybrid_over_http_blends_judge_and_keyword() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content":
                    "{\"analysis\":[{\"persona_title\":\"Persona A\",\"confidence\":80,\"reasoning\":\"on topic\"}]}"}}],
                "usage": {"total_tokens": 500}
            })))
            .mount(&server)
            .await;

        let config = AiConfig {
            api_base_url: server.uri(),
            ..AiConfig::default()
        };
        let backend = Arc::new(OpenAiBackend::new("sk-test", server.uri(), "chat", "embed").unwrap());
        let classifier = Classifier::with_backend(&config, ClassificationMode::Hybrid, backend);

        let p = page("https://x.com/p", None, CONTENT);
        let keyword = KeywordStrategy::new(0.1).score_all(&p, &personas());
        let scores = classifier.classify(&p, &personas()).await;

        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].method, MappingMethod::AiHybrid);
        assert!((scores[0].confidence - (0.8 * 0.7 + keyword[0].confidence * 0.3)).abs() < 1e-9);
        let (daily, _) = classifier.spend().unwrap();
        assert!(daily > 0.0);
    }

    #[tokio::test]
    async fn server_error_over_http_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let backend = Arc::new(OpenAiBackend::new("sk-test", server.uri(), "chat", "embed").unwrap());
        let classifier =
            Classifier::with_backend(&AiConfig::default(), ClassificationMode::Embedding, backend);
        let scores = classifier
            .classify(&page("https://x.com/p", None, CONTENT), &personas())
            .await;
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].method, MappingMethod::Keyword);
    }
}
