//! Keyword relevance scoring.
//!
//! Score for one persona:
//!
//! ```text
//! matched_keywords / keywords            (base)
//! + min(occurrences / tokens, 0.3)       (frequency)
//! + title_matches / keywords * 0.2       (title)
//! + url_matches / keywords * 0.1         (url)
//! ```
//!
//! clamped to 1.0. A multi-word keyword counts once per contiguous
//! occurrence; when all its words appear but never together it counts as a
//! half occurrence.

use std::collections::HashSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use personamap_shared::{CrawledPage, MappingMethod, PersonaDefinition, PersonaScore, Result};
use regex::Regex;

use crate::RelevanceStrategy;

/// Pages with less trimmed text than this are not scored.
pub const MIN_CONTENT_CHARS: usize = 50;

const MAX_FREQUENCY_BOOST: f64 = 0.3;
const TITLE_WEIGHT: f64 = 0.2;
const URL_WEIGHT: f64 = 0.1;
const PARTIAL_MATCH: f64 = 0.5;
/// Matches listed in a reason before summarising the rest.
const REASON_MATCHES: usize = 5;

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[a-zA-Z]{3,}\b").expect("valid regex"));

static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
        "is", "are", "was", "were", "be", "been", "being", "have", "has", "had", "do", "does",
        "did", "will", "would", "could", "should", "may", "might", "can", "this", "that", "these",
        "those",
    ]
    .into_iter()
    .collect()
});

/// Lowercase words of three or more ASCII letters, minus stop words.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    WORD_RE
        .find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|w| !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Contiguous occurrences of `phrase` in `tokens`.
fn count_phrase(tokens: &[String], phrase: &[&str]) -> usize {
    if phrase.is_empty() || phrase.len() > tokens.len() {
        return 0;
    }
    tokens
        .windows(phrase.len())
        .filter(|window| window.iter().zip(phrase).all(|(t, p)| t == p))
        .count()
}

fn contains_phrase(tokens: &[String], phrase: &[&str]) -> bool {
    count_phrase(tokens, phrase) > 0
}

// ---------------------------------------------------------------------------
// KeywordStrategy
// ---------------------------------------------------------------------------

/// Scores personas by keyword occurrence in page text, title, and URL.
#[derive(Debug, Clone)]
pub struct KeywordStrategy {
    threshold: f64,
}

impl KeywordStrategy {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Score every persona, keeping those above the threshold, best first.
    pub fn score_all(&self, page: &CrawledPage, personas: &[PersonaDefinition]) -> Vec<PersonaScore> {
        if page.content.trim().chars().count() < MIN_CONTENT_CHARS {
            return Vec::new();
        }

        let tokens = tokenize(&page.content);
        if tokens.is_empty() {
            return Vec::new();
        }
        let title_tokens = page.title.as_deref().map(tokenize).unwrap_or_default();
        let url_tokens = tokenize(&page.url);

        let mut scores: Vec<PersonaScore> = personas
            .iter()
            .filter_map(|persona| {
                let (confidence, reason) =
                    score_persona(&tokens, &title_tokens, &url_tokens, persona)?;
                (confidence > self.threshold).then(|| PersonaScore {
                    persona_id: persona.id.clone(),
                    confidence,
                    reason,
                    method: MappingMethod::Keyword,
                })
            })
            .collect();

        scores.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        scores
    }
}

#[async_trait]
impl RelevanceStrategy for KeywordStrategy {
    fn name(&self) -> &'static str {
        "keyword"
    }

    async fn score(
        &self,
        page: &CrawledPage,
        personas: &[PersonaDefinition],
    ) -> Result<Vec<PersonaScore>> {
        Ok(self.score_all(page, personas))
    }
}

/// Confidence and reason for one persona, or `None` when nothing matched.
fn score_persona(
    tokens: &[String],
    title_tokens: &[String],
    url_tokens: &[String],
    persona: &PersonaDefinition,
) -> Option<(f64, String)> {
    let keywords: Vec<String> = persona
        .keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();
    if keywords.is_empty() {
        return None;
    }

    let mut matches = Vec::new();
    let mut occurrences = 0.0;
    let mut title_matches = 0usize;
    let mut url_matches = 0usize;

    for keyword in &keywords {
        let parts: Vec<&str> = keyword.split_whitespace().collect();

        let count = count_phrase(tokens, &parts);
        if count > 0 {
            matches.push(format!("'{keyword}' ({count}x)"));
            occurrences += count as f64;
        } else if parts.len() > 1 && parts.iter().all(|p| tokens.iter().any(|t| t == p)) {
            matches.push(format!("'{keyword}' (partial)"));
            occurrences += PARTIAL_MATCH;
        }

        if contains_phrase(title_tokens, &parts) {
            title_matches += 1;
        }
        if contains_phrase(url_tokens, &parts) {
            url_matches += 1;
        }
    }

    if matches.is_empty() {
        return None;
    }

    let total = keywords.len() as f64;
    let base = matches.len() as f64 / total;
    let frequency = (occurrences / tokens.len() as f64).min(MAX_FREQUENCY_BOOST);
    let title_bonus = title_matches as f64 / total * TITLE_WEIGHT;
    let url_bonus = url_matches as f64 / total * URL_WEIGHT;
    let confidence = (base + frequency + title_bonus + url_bonus).min(1.0);

    let mut reason = format!(
        "Matched keywords: {}",
        matches
            .iter()
            .take(REASON_MATCHES)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    );
    if matches.len() > REASON_MATCHES {
        reason.push_str(&format!(" and {} more", matches.len() - REASON_MATCHES));
    }
    if title_bonus > 0.0 {
        reason.push_str(" (title match)");
    }
    if url_bonus > 0.0 {
        reason.push_str(" (URL match)");
    }

    Some((confidence, reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{page, persona};

    #[test]
    fn tokenize_drops_short_and_stop_words() {
        assert_eq!(
            tokenize("The API is at the Top-level of an app, v2 beta!"),
            vec!["api", "top", "level", "app", "beta"]
        );
    }

    #[test]
    fn scores_matching_persona_only() {
        let content = "alpha alpha alpha alpha alpha beta lorem ipsum dolor sit amet consectetur";
        let personas = vec![
            persona("a", "Persona A", &["alpha", "beta"]),
            persona("b", "Persona B", &["gamma"]),
        ];
        let scores = KeywordStrategy::new(0.1).score_all(&page("https://x.com/p", None, content), &personas);

        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].persona_id, "a");
        assert!(scores[0].confidence > 0.0);
        assert_eq!(scores[0].method, MappingMethod::Keyword);
        assert!(scores[0].reason.contains("'alpha' (5x)"));
        assert!(scores[0].reason.contains("'beta' (1x)"));
    }

    #[test]
    fn phrase_contiguous_and_partial() {
        let tokens = tokenize("machine learning models use machine data for learning tasks");
        assert_eq!(count_phrase(&tokens, &["machine", "learning"]), 1);

        let content = "learning about every machine in the factory floor during the morning shift";
        let personas = vec![persona("p", "Engineer", &["machine learning", "robotics"])];
        let scores = KeywordStrategy::new(0.1).score_all(&page("https://x.com/", None, content), &personas);
        assert_eq!(scores.len(), 1);
        assert!(scores[0].reason.contains("(partial)"));
        // One of two keywords matched, plus a small frequency boost.
        assert!(scores[0].confidence > 0.5 && scores[0].confidence < 0.6);
    }

    #[test]
    fn title_and_url_bonuses() {
        let content = "pricing details for every plan we offer to teams and enterprises worldwide";
        let personas = vec![persona("p", "Buyer", &["pricing", "discounts"])];
        let plain = KeywordStrategy::new(0.1)
            .score_all(&page("https://x.com/about", None, content), &personas);
        let boosted = KeywordStrategy::new(0.1).score_all(
            &page("https://x.com/pricing", Some("Pricing plans"), content),
            &personas,
        );
        // base 0.5 + frequency 1/8, then +0.1 title and +0.05 url
        assert!((plain[0].confidence - 0.625).abs() < 1e-9);
        assert!((boosted[0].confidence - 0.775).abs() < 1e-9);
        assert!(boosted[0].reason.contains("(title match)"));
        assert!(boosted[0].reason.contains("(URL match)"));
    }

    #[test]
    fn short_content_and_empty_keywords_score_nothing() {
        let strategy = KeywordStrategy::new(0.1);
        let personas = vec![persona("a", "A", &["alpha"]), persona("b", "B", &[])];
        assert!(strategy.score_all(&page("https://x.com/", None, "alpha alpha"), &personas).is_empty());

        let long = "beta ".repeat(20);
        assert!(strategy.score_all(&page("https://x.com/", None, &long), &personas).is_empty());
    }

    #[test]
    fn threshold_filters_weak_matches() {
        let content = "alpha ".to_string() + &"filler ".repeat(40);
        let keywords: Vec<&str> = vec!["alpha", "k1", "k2", "k3", "k4", "k5", "k6", "k7", "k8", "k9", "k10", "k11"];
        let personas = vec![persona("a", "A", &keywords)];
        let strict = KeywordStrategy::new(0.5).score_all(&page("https://x.com/", None, &content), &personas);
        assert!(strict.is_empty());
        let lax = KeywordStrategy::new(0.01).score_all(&page("https://x.com/", None, &content), &personas);
        assert_eq!(lax.len(), 1);
    }

    #[test]
    fn reason_summarises_many_matches() {
        let content = "one two three four five six seven words repeated one two three four five six seven";
        let keywords = ["one", "two", "three", "four", "five", "six", "seven"];
        let personas = vec![persona("p", "Counter", &keywords)];
        let scores = KeywordStrategy::new(0.1).score_all(&page("https://x.com/", None, content), &personas);
        assert!(scores[0].reason.ends_with("and 2 more"));
        assert_eq!(scores[0].confidence, 1.0);
    }
}
