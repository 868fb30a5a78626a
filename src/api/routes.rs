use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::health::FeedState;
use crate::api::latency::{LatencyStats, Percentiles};
use crate::error::AppError;
use crate::status::{StatusSources, StatusSummary};
use crate::types::MarketRecord;

#[derive(Clone)]
pub struct ApiState {
    pub sources: StatusSources,
    pub semantic_latency: Arc<LatencyStats>,
    pub reasoning_latency: Arc<LatencyStats>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/markets", get(get_markets))
        .route("/stats/summary", get(get_stats_summary))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize, Default)]
pub struct MarketsQuery {
    pub analyzed: Option<bool>,
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub feed_state: FeedState,
    pub connected: bool,
    pub connects: u64,
    pub last_trade_at: Option<i64>,
    pub trade_queue_depth: usize,
    pub store_queue_depth: u64,
    pub markets_tracked: usize,
}

#[derive(Serialize)]
pub struct MarketResponse {
    #[serde(flatten)]
    pub record: MarketRecord,
    pub link: String,
}

#[derive(Serialize)]
pub struct LatencyResponse {
    pub semantic_filter: Percentiles,
    pub reasoning: Percentiles,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let s = &state.sources;
    let feed_state = s.health.feed_state();
    let last = s.health.last_trade_at();
    Json(HealthResponse {
        status: if s.health.shutting_down() { "shutting_down" } else { "ok" },
        feed_state,
        connected: feed_state == FeedState::Connected,
        connects: s.health.connects(),
        last_trade_at: (last > 0).then_some(last),
        trade_queue_depth: s.queue.depth(),
        store_queue_depth: s.health.write_queue_pending(),
        markets_tracked: s.store.len(),
    })
}

async fn get_markets(
    State(state): State<ApiState>,
    Query(params): Query<MarketsQuery>,
) -> Result<Json<Vec<MarketResponse>>, AppError> {
    if params.limit == Some(0) {
        return Err(AppError::BadRequest("limit must be at least 1".to_string()));
    }
    let mut records: Vec<MarketRecord> = state
        .sources
        .store
        .snapshot()
        .into_iter()
        .filter(|m| params.analyzed.map_or(true, |a| m.analyzed == a))
        .collect();
    records.sort_by(|a, b| b.last_trade_at.cmp(&a.last_trade_at));
    if let Some(limit) = params.limit {
        records.truncate(limit);
    }

    Ok(Json(
        records
            .into_iter()
            .map(|record| MarketResponse { link: record.link(), record })
            .collect(),
    ))
}

async fn get_stats_summary(State(state): State<ApiState>) -> Json<StatusSummary> {
    Json(state.sources.summary())
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    Json(LatencyResponse {
        semantic_filter: state.semantic_latency.percentiles(),
        reasoning: state.reasoning_latency.percentiles(),
    })
}
