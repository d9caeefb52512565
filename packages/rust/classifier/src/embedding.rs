//! Embedding similarity between page content and persona profiles.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use personamap_shared::{CrawledPage, MappingMethod, PersonaDefinition, PersonaScore, Result};
use tokio::sync::Mutex;
use tracing::debug;

use crate::RelevanceStrategy;
use crate::backend::MeteredBackend;
use crate::text::{clean_content, truncate_chars};

/// Cosine similarity of two vectors; 0 when either is empty, zero, or the
/// lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Scores personas by cosine similarity of embeddings.
///
/// Persona vectors are cached per persona id and recomputed when the
/// persona's profile text changes.
pub struct EmbeddingStrategy {
    ai: Arc<MeteredBackend>,
    threshold: f64,
    chunk_size: usize,
    cache: Mutex<HashMap<String, (String, Vec<f32>)>>,
}

impl EmbeddingStrategy {
    pub fn new(ai: Arc<MeteredBackend>, threshold: f64, chunk_size: usize) -> Self {
        Self {
            ai,
            threshold,
            chunk_size,
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn persona_vector(&self, persona: &PersonaDefinition) -> Result<Vec<f32>> {
        let profile = persona.profile_text();
        {
            let cache = self.cache.lock().await;
            if let Some((text, vector)) = cache.get(&persona.id) {
                if *text == profile {
                    return Ok(vector.clone());
                }
            }
        }

        let embedding = self.ai.embed(&profile).await?;
        self.cache
            .lock()
            .await
            .insert(persona.id.clone(), (profile, embedding.vector.clone()));
        Ok(embedding.vector)
    }
}

#[async_trait]
impl RelevanceStrategy for EmbeddingStrategy {
    fn name(&self) -> &'static str {
        "embedding"
    }

    async fn score(
        &self,
        page: &CrawledPage,
        personas: &[PersonaDefinition],
    ) -> Result<Vec<PersonaScore>> {
        let content = clean_content(&page.content);
        if content.is_empty() || personas.is_empty() {
            return Ok(Vec::new());
        }
        let content = truncate_chars(&content, self.chunk_size);
        let page_vector = self.ai.embed(&content).await?.vector;

        let mut scores = Vec::new();
        for persona in personas {
            let persona_vector = self.persona_vector(persona).await?;
            let similarity = cosine_similarity(&page_vector, &persona_vector);
            let confidence = similarity.clamp(0.0, 1.0);
            debug!(persona = %persona.id, similarity, "embedding similarity");

            if confidence > self.threshold {
                scores.push(PersonaScore {
                    persona_id: persona.id.clone(),
                    confidence,
                    reason: format!("Semantic similarity: {similarity:.3}"),
                    method: MappingMethod::AiLocal,
                });
            }
        }

        scores.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedBackend, metered, page, persona};

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) < 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn maps_similar_personas_and_caches_vectors() {
        let backend = Arc::new(
            ScriptedBackend::default()
                .embedding("Developer", vec![1.0, 0.0])
                .embedding("Marketer", vec![0.0, 1.0])
                .embedding("api", vec![0.9, 0.1]),
        );
        let strategy = EmbeddingStrategy::new(metered(backend.clone()), 0.5, 2000);
        let personas = vec![
            persona("dev", "Developer", &["sdk"]),
            persona("mkt", "Marketer", &["brand"]),
        ];
        let p = page("https://x.com/docs", None, "The api reference for our platform");

        let scores = strategy.score(&p, &personas).await.unwrap();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].persona_id, "dev");
        assert_eq!(scores[0].method, MappingMethod::AiLocal);
        assert!(scores[0].reason.starts_with("Semantic similarity: 0.99"));

        strategy.score(&p, &personas).await.unwrap();
        // Two page embeddings plus one per persona.
        assert_eq!(backend.embed_calls(), 4);
    }

    #[tokio::test]
    async fn backend_failure_propagates() {
        let backend = Arc::new(ScriptedBackend::failing());
        let strategy = EmbeddingStrategy::new(metered(backend), 0.5, 2000);
        let personas = vec![persona("dev", "Developer", &["sdk"])];
        let err = strategy
            .score(&page("https://x.com/", None, "some content"), &personas)
            .await
            .unwrap_err();
        assert!(err.is_ai_failure());
    }
}
