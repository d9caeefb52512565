//! Composite strategies built from an AI strategy and keyword scoring.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use personamap_shared::{CrawledPage, MappingMethod, PersonaDefinition, PersonaScore, Result};
use tracing::warn;

use crate::RelevanceStrategy;
use crate::judge::JudgeStrategy;
use crate::keyword::KeywordStrategy;

const AI_WEIGHT: f64 = 0.7;
const KEYWORD_WEIGHT: f64 = 0.3;

// ---------------------------------------------------------------------------
// Hybrid
// ---------------------------------------------------------------------------

/// Runs an AI strategy and keyword scoring independently and blends them.
pub struct HybridStrategy {
    ai: Box<dyn RelevanceStrategy>,
    keyword: KeywordStrategy,
}

impl HybridStrategy {
    pub fn new(ai: Box<dyn RelevanceStrategy>, keyword: KeywordStrategy) -> Self {
        Self { ai, keyword }
    }
}

#[async_trait]
impl RelevanceStrategy for HybridStrategy {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    async fn score(
        &self,
        page: &CrawledPage,
        personas: &[PersonaDefinition],
    ) -> Result<Vec<PersonaScore>> {
        let ai_scores = self.ai.score(page, personas).await?;
        let keyword_scores = self.keyword.score_all(page, personas);
        Ok(merge_scores(ai_scores, keyword_scores))
    }
}

/// Blend per persona: `0.7·ai + 0.3·keyword` when both scored, otherwise
/// whichever one did.
pub(crate) fn merge_scores(ai: Vec<PersonaScore>, keyword: Vec<PersonaScore>) -> Vec<PersonaScore> {
    let mut merged: HashMap<String, PersonaScore> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for score in ai {
        if merged.contains_key(&score.persona_id) {
            continue;
        }
        order.push(score.persona_id.clone());
        merged.insert(
            score.persona_id.clone(),
            PersonaScore {
                method: MappingMethod::AiHybrid,
                ..score
            },
        );
    }

    let mut seen_keyword: HashSet<String> = HashSet::new();
    for score in keyword {
        if !seen_keyword.insert(score.persona_id.clone()) {
            continue;
        }
        match merged.get_mut(&score.persona_id) {
            Some(existing) => {
                existing.confidence =
                    existing.confidence * AI_WEIGHT + score.confidence * KEYWORD_WEIGHT;
                existing.reason = format!("{} + {}", existing.reason, score.reason);
            }
            None => {
                order.push(score.persona_id.clone());
                merged.insert(
                    score.persona_id.clone(),
                    PersonaScore {
                        method: MappingMethod::KeywordHybrid,
                        ..score
                    },
                );
            }
        }
    }

    let mut out: Vec<PersonaScore> = order
        .into_iter()
        .filter_map(|id| merged.remove(&id))
        .collect();
    out.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    out
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Keyword scoring, with each mapped persona re-rated by the judge.
pub struct ValidationStrategy {
    judge: JudgeStrategy,
    keyword: KeywordStrategy,
}

impl ValidationStrategy {
    pub fn new(judge: JudgeStrategy, keyword: KeywordStrategy) -> Self {
        Self { judge, keyword }
    }
}

#[async_trait]
impl RelevanceStrategy for ValidationStrategy {
    fn name(&self) -> &'static str {
        "validation"
    }

    async fn score(
        &self,
        page: &CrawledPage,
        personas: &[PersonaDefinition],
    ) -> Result<Vec<PersonaScore>> {
        let keyword_scores = self.keyword.score_all(page, personas);
        let mut out = Vec::with_capacity(keyword_scores.len());

        for score in keyword_scores {
            let Some(persona) = personas.iter().find(|p| p.id == score.persona_id) else {
                continue;
            };
            match self.judge.validate(page, persona).await {
                Ok(ai_confidence) => out.push(PersonaScore {
                    persona_id: score.persona_id,
                    confidence: (score.confidence + ai_confidence) / 2.0,
                    reason: format!("Keyword + AI validation: {}", score.reason),
                    method: MappingMethod::AiValidation,
                }),
                Err(e) => {
                    warn!(persona = %persona.id, error = %e, "validation failed, keeping keyword mapping");
                    out.push(score);
                }
            }
        }

        out.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Ok(out)
    }
}
