use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::llm::{extract_json_object, Llm};
use crate::types::SemanticVerdict;

/// Stage-2 collaborator: decides whether a market is worth tracking.
#[async_trait]
pub trait SemanticFilter: Send + Sync {
    async fn classify(&self, title: &str, event_slug: &str) -> Result<SemanticVerdict>;
}

/// Used when no LLM is configured. Includes everything Stage 1 let through.
pub struct PassThrough;

#[async_trait]
impl SemanticFilter for PassThrough {
    async fn classify(&self, _title: &str, _event_slug: &str) -> Result<SemanticVerdict> {
        Ok(SemanticVerdict {
            should_include: true,
            category: "unfiltered".to_string(),
            emotional_level: "unknown".to_string(),
            reason: "semantic filter disabled".to_string(),
        })
    }
}

const SYSTEM_PROMPT: &str = "You screen prediction markets for a whale-trade tracker. \
Exclude markets about cryptocurrency prices, sports results, esports, and short-term \
price up/down windows. Include politics, economics, geopolitics, science, culture and \
other markets where informed money can carry signal. \
Reply with a single JSON object and nothing else: \
{\"shouldInclude\": bool, \"category\": string, \"emotionalLevel\": \"low\"|\"medium\"|\"high\", \"reason\": string}";

pub struct LlmSemanticFilter {
    llm: Arc<dyn Llm>,
}

impl LlmSemanticFilter {
    pub fn new(llm: Arc<dyn Llm>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl SemanticFilter for LlmSemanticFilter {
    async fn classify(&self, title: &str, event_slug: &str) -> Result<SemanticVerdict> {
        let user = format!("Market title: {title}\nEvent slug: {event_slug}");
        let text = self.llm.complete(SYSTEM_PROMPT, &user).await?;
        parse_verdict(&text)
    }
}

pub fn parse_verdict(text: &str) -> Result<SemanticVerdict> {
    let json = extract_json_object(text)
        .ok_or_else(|| AppError::Llm("semantic filter reply had no JSON object".to_string()))?;
    Ok(serde_json::from_str(json)?)
}
