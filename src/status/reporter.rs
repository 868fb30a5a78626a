use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::analysis::AnalysisCounters;
use crate::api::health::{FeedState, HealthState};
use crate::ingest::{IngestStats, TradeQueue};
use crate::state::market_store::now_secs;
use crate::state::MarketStore;
use crate::types::MarketRecord;

/// Handles to everything the summary reads. Cheap to clone; shared with the HTTP API.
#[derive(Clone)]
pub struct StatusSources {
    pub store: Arc<MarketStore>,
    pub ingest: Arc<IngestStats>,
    pub analysis: Arc<AnalysisCounters>,
    pub queue: TradeQueue,
    pub health: Arc<HealthState>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusSummary {
    pub generated_at: i64,
    pub tracked: usize,
    pub analyzed: usize,
    pub unanalyzed: usize,
    pub predictions: u64,
    pub consensus_picks: u64,
    pub trades_received: u64,
    pub trades_accepted: u64,
    pub rejected_stage1: u64,
    pub rejected_semantic: u64,
    pub queue_depth: usize,
    pub queue_dropped: u64,
    pub store_pending: u64,
    pub feed_state: FeedState,
}

impl StatusSummary {
    /// Table counts only; counters start at zero.
    pub fn from_records(records: &[MarketRecord], now: i64) -> Self {
        let analyzed = records.iter().filter(|m| m.analyzed).count();
        Self {
            generated_at: now,
            tracked: records.len(),
            analyzed,
            unanalyzed: records.len() - analyzed,
            predictions: 0,
            consensus_picks: 0,
            trades_received: 0,
            trades_accepted: 0,
            rejected_stage1: 0,
            rejected_semantic: 0,
            queue_depth: 0,
            queue_dropped: 0,
            store_pending: 0,
            feed_state: FeedState::Disconnected,
        }
    }
}

impl StatusSources {
    pub fn summary(&self) -> StatusSummary {
        let mut s = StatusSummary::from_records(&self.store.snapshot(), now_secs());
        s.predictions = self.analysis.predictions.load(Ordering::Relaxed);
        s.consensus_picks = self.analysis.consensus_picks.load(Ordering::Relaxed);
        s.trades_received = self.ingest.received.load(Ordering::Relaxed);
        s.trades_accepted = self.ingest.accepted.load(Ordering::Relaxed);
        s.rejected_stage1 = self.ingest.rejected_stage1.load(Ordering::Relaxed);
        s.rejected_semantic = self.ingest.rejected_semantic.load(Ordering::Relaxed);
        s.queue_depth = self.queue.depth();
        s.queue_dropped = self.queue.dropped();
        s.store_pending = self.health.write_queue_pending();
        s.feed_state = self.health.feed_state();
        s
    }
}

/// Logs a read-only summary of the pipeline on a fixed interval.
pub struct StatusReporter {
    sources: StatusSources,
    interval: Duration,
}

impl StatusReporter {
    pub fn new(sources: StatusSources, interval: Duration) -> Self {
        Self { sources, interval }
    }

    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await; // consume immediate first tick

        loop {
            interval.tick().await;
            let s = self.sources.summary();
            info!(
                tracked = s.tracked,
                analyzed = s.analyzed,
                unanalyzed = s.unanalyzed,
                predictions = s.predictions,
                consensus = s.consensus_picks,
                queue_dropped = s.queue_dropped,
                feed = %s.feed_state,
                "[STATUS] {} | markets: {} tracked, {} analyzed, {} pending | predictions: {} | consensus picks: {} | trades: {} in, {} kept | queue: {} queued, {} dropped | feed: {}",
                format_clock(s.generated_at),
                s.tracked,
                s.analyzed,
                s.unanalyzed,
                s.predictions,
                s.consensus_picks,
                s.trades_received,
                s.trades_accepted,
                s.queue_depth,
                s.queue_dropped,
                s.feed_state,
            );
        }
    }
}

/// `HH:MM:SS UTC` for a unix timestamp.
pub fn format_clock(unix_secs: i64) -> String {
    let day = unix_secs.rem_euclid(86_400);
    format!("{:02}:{:02}:{:02} UTC", day / 3600, (day % 3600) / 60, day % 60)
}
