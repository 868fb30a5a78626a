use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::api::latency::LatencyStats;
use crate::config::FilterConfig;
use crate::filter::keywords::{KeywordFilter, Stage1Rejection};
use crate::filter::semantic::SemanticFilter;
use crate::types::{SemanticVerdict, TradeEvent};

/// Verdicts are cached per market; the cache is wiped once it reaches this size.
const VERDICT_CACHE_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    Stage1(Stage1Rejection),
    Semantic { category: String, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutcome {
    Accepted(SemanticVerdict),
    Rejected(Rejection),
}

/// Two-stage filter: cheap synchronous checks, then the semantic collaborator.
///
/// Stage 2 is bounded by a timeout and fails open: a collaborator error or timeout
/// lets the trade through with category `unclassified`.
pub struct FilterPipeline {
    keywords: KeywordFilter,
    semantic: Arc<dyn SemanticFilter>,
    timeout: Duration,
    cache: DashMap<String, SemanticVerdict>,
    latency: Arc<LatencyStats>,
}

impl FilterPipeline {
    pub fn new(
        cfg: &FilterConfig,
        semantic: Arc<dyn SemanticFilter>,
        latency: Arc<LatencyStats>,
    ) -> Self {
        Self {
            keywords: KeywordFilter::new(cfg),
            semantic,
            timeout: cfg.semantic_timeout,
            cache: DashMap::new(),
            latency,
        }
    }

    pub async fn evaluate(&self, trade: &TradeEvent) -> FilterOutcome {
        if let Err(r) = self.keywords.check(trade) {
            if let Stage1Rejection::Keyword(idx) = r {
                debug!(
                    market_id = %trade.market_id,
                    keyword = self.keywords.keyword(idx).unwrap_or("?"),
                    "[FILTER] keyword reject"
                );
            }
            return FilterOutcome::Rejected(Rejection::Stage1(r));
        }

        let verdict = self.semantic_verdict(trade).await;
        if verdict.should_include {
            FilterOutcome::Accepted(verdict)
        } else {
            debug!(
                market_id = %trade.market_id,
                category = %verdict.category,
                reason = %verdict.reason,
                "[FILTER] semantic reject"
            );
            FilterOutcome::Rejected(Rejection::Semantic {
                category: verdict.category,
                reason: verdict.reason,
            })
        }
    }

    async fn semantic_verdict(&self, trade: &TradeEvent) -> SemanticVerdict {
        if let Some(cached) = self.cache.get(&trade.market_id) {
            return cached.clone();
        }

        let started = Instant::now();
        let result = tokio::time::timeout(
            self.timeout,
            self.semantic.classify(&trade.title, &trade.event_slug),
        )
        .await;
        self.latency.record(started.elapsed());

        match result {
            Ok(Ok(verdict)) => {
                if self.cache.len() >= VERDICT_CACHE_CAPACITY {
                    self.cache.clear();
                }
                self.cache.insert(trade.market_id.clone(), verdict.clone());
                verdict
            }
            Ok(Err(e)) => {
                warn!(market_id = %trade.market_id, "[FILTER] semantic filter failed, letting trade through: {e}");
                SemanticVerdict::fail_open(format!("semantic filter error: {e}"))
            }
            Err(_) => {
                warn!(
                    market_id = %trade.market_id,
                    timeout_secs = self.timeout.as_secs_f64(),
                    "[FILTER] semantic filter timed out, letting trade through"
                );
                SemanticVerdict::fail_open("semantic filter timeout")
            }
        }
    }
}
