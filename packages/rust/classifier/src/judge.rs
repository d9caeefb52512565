//! LLM-judge scoring: one chat completion rates every persona for a page.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use personamap_shared::{
    CrawledPage, MappingMethod, PersonaDefinition, PersonaMapError, PersonaScore, Result,
};
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::RelevanceStrategy;
use crate::backend::{ChatRequest, MeteredBackend, Message};
use crate::text::{clean_content, truncate_chars};

const SYSTEM_PROMPT: &str = "You are an expert content analyst specializing in persona mapping \
for marketing and content strategy.";

/// Characters of content sent with a single-persona validation prompt.
const VALIDATION_CHARS: usize = 1000;
const VALIDATION_MAX_TOKENS: u32 = 10;
const VALIDATION_TEMPERATURE: f32 = 0.1;

static JSON_OBJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));
static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(\.\d+)?").expect("valid regex"));

#[derive(Debug, Deserialize)]
struct JudgeResponse {
    #[serde(default)]
    analysis: Vec<JudgeEntry>,
}

#[derive(Debug, Deserialize)]
struct JudgeEntry {
    persona_title: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Scores personas by asking a chat model for 0–100 ratings.
pub struct JudgeStrategy {
    ai: Arc<MeteredBackend>,
    threshold: f64,
    chunk_size: usize,
    max_tokens: u32,
    temperature: f32,
}

impl JudgeStrategy {
    pub fn new(
        ai: Arc<MeteredBackend>,
        threshold: f64,
        chunk_size: usize,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        Self {
            ai,
            threshold,
            chunk_size,
            max_tokens,
            temperature,
        }
    }

    fn build_prompt(&self, page: &CrawledPage, personas: &[PersonaDefinition]) -> String {
        let content = truncate_chars(&clean_content(&page.content), self.chunk_size);
        let personas_info = personas
            .iter()
            .map(|p| {
                let keywords = if p.keywords.is_empty() {
                    "None".to_string()
                } else {
                    p.keywords.join(", ")
                };
                format!("- {}: {} (Keywords: {keywords})", p.title, p.description)
            })
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            r#"Analyze this web content and determine its relevance to each persona. Provide a confidence score (0-100) and reasoning for each persona.

URL: {url}
Title: {title}

Content:
{content}

Personas to evaluate:
{personas_info}

Please respond in JSON format:
{{
    "analysis": [
        {{
            "persona_title": "Persona Name",
            "confidence": 85,
            "reasoning": "Brief explanation of why this content matches this persona"
        }}
    ]
}}

Focus on semantic meaning, not just keyword matching."#,
            url = page.url,
            title = page.title.as_deref().unwrap_or("No title"),
        )
    }

    /// Rate one persona for a page in `[0, 1]`.
    pub async fn validate(&self, page: &CrawledPage, persona: &PersonaDefinition) -> Result<f64> {
        let content = truncate_chars(&clean_content(&page.content), VALIDATION_CHARS);
        let keywords = if persona.keywords.is_empty() {
            "None".to_string()
        } else {
            persona.keywords.join(", ")
        };
        let prompt = format!(
            "Rate how relevant this content is to the persona \"{title}\" on a scale of 0-100.\n\n\
             Persona: {title}\nDescription: {description}\nKeywords: {keywords}\n\n\
             Content: {content}\n\nRespond with just a number (0-100):",
            title = persona.title,
            description = persona.description,
        );

        let completion = self
            .ai
            .chat(&ChatRequest {
                messages: vec![Message::user(prompt)],
                max_tokens: VALIDATION_MAX_TOKENS,
                temperature: VALIDATION_TEMPERATURE,
            })
            .await?;

        parse_rating(&completion.content)
    }
}

#[async_trait]
impl RelevanceStrategy for JudgeStrategy {
    fn name(&self) -> &'static str {
        "judge"
    }

    async fn score(
        &self,
        page: &CrawledPage,
        personas: &[PersonaDefinition],
    ) -> Result<Vec<PersonaScore>> {
        if page.content.trim().is_empty() || personas.is_empty() {
            return Ok(Vec::new());
        }

        let completion = self
            .ai
            .chat(&ChatRequest {
                messages: vec![
                    Message::system(SYSTEM_PROMPT),
                    Message::user(self.build_prompt(page, personas)),
                ],
                max_tokens: self.max_tokens,
                temperature: self.temperature,
            })
            .await?;

        let scores = parse_judge_response(&completion.content, personas, self.threshold)?;
        debug!(mapped = scores.len(), "judge response parsed");
        Ok(scores)
    }
}

/// Parse the judge's JSON, tolerating prose around it.
fn parse_judge_response(
    text: &str,
    personas: &[PersonaDefinition],
    threshold: f64,
) -> Result<Vec<PersonaScore>> {
    let json = JSON_OBJECT_RE
        .find(text)
        .map(|m| m.as_str())
        .unwrap_or(text);
    let response: JudgeResponse = serde_json::from_str(json)
        .map_err(|e| PersonaMapError::parse(format!("judge response is not valid JSON: {e}")))?;

    let mut scores: Vec<PersonaScore> = Vec::new();
    for entry in response.analysis {
        let wanted = entry.persona_title.trim();
        let Some(persona) = personas
            .iter()
            .find(|p| p.title.trim().eq_ignore_ascii_case(wanted))
        else {
            continue;
        };
        let confidence = (entry.confidence / 100.0).clamp(0.0, 1.0);
        if confidence <= threshold || scores.iter().any(|s| s.persona_id == persona.id) {
            continue;
        }
        scores.push(PersonaScore {
            persona_id: persona.id.clone(),
            confidence,
            reason: format!(
                "AI analysis: {}",
                entry.reasoning.as_deref().unwrap_or("no reasoning given")
            ),
            method: MappingMethod::AiJudge,
        });
    }

    scores.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    Ok(scores)
}

/// First number in a reply, as a fraction of 100.
fn parse_rating(text: &str) -> Result<f64> {
    let number = NUMBER_RE
        .find(text)
        .ok_or_else(|| PersonaMapError::parse(format!("no rating in reply '{}'", text.trim())))?;
    let value: f64 = number
        .as_str()
        .parse()
        .map_err(|e| PersonaMapError::parse(format!("bad rating '{}': {e}", number.as_str())))?;
    Ok((value / 100.0).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedBackend, metered, page, persona};

    fn personas() -> Vec<PersonaDefinition> {
        vec![
            persona("dev", "Developer", &["api"]),
            persona("mkt", "Marketer", &["brand"]),
        ]
    }

    #[test]
    fn parses_json_wrapped_in_prose() {
        let reply = r#"Sure! Here is my analysis:
```json
{"analysis": [
  {"persona_title": "Developer", "confidence": 85, "reasoning": "API docs"},
  {"persona_title": "marketer", "confidence": 20, "reasoning": "barely"},
  {"persona_title": "Unknown", "confidence": 99, "reasoning": "?"}
]}
```
Hope this helps."#;
        let scores = parse_judge_response(reply, &personas(), 0.3).unwrap();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].persona_id, "dev");
        assert!((scores[0].confidence - 0.85).abs() < 1e-9);
        assert_eq!(scores[0].reason, "AI analysis: API docs");
        assert_eq!(scores[0].method, MappingMethod::AiJudge);
    }

    #[test]
    fn unparseable_reply_is_error() {
        assert!(parse_judge_response("I cannot help with that.", &personas(), 0.3).is_err());
    }

    #[test]
    fn rating_parsing() {
        assert!((parse_rating("75").unwrap() - 0.75).abs() < 1e-9);
        assert!((parse_rating("Score: 150/100").unwrap() - 1.0).abs() < 1e-9);
        assert!(parse_rating("none").is_err());
    }

    #[tokio::test]
    async fn scores_through_backend() {
        let backend = Arc::new(ScriptedBackend::default().chat_reply(
            r#"{"analysis":[{"persona_title":"Marketer","confidence":64,"reasoning":"brand story"}]}"#,
        ));
        let strategy = JudgeStrategy::new(metered(backend.clone()), 0.3, 2000, 1000, 0.3);
        let scores = strategy
            .score(&page("https://x.com/", Some("Brand"), "Our brand story"), &personas())
            .await
            .unwrap();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].persona_id, "mkt");
        assert_eq!(backend.chat_calls(), 1);

        let prompt = backend.last_prompt();
        assert!(prompt.contains("- Developer:  (Keywords: api)"));
        assert!(prompt.contains("Title: Brand"));
    }
}
