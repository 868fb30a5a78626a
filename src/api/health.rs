//! Shared health state for the /health endpoint.
//! Updated by the feed connector, the ingest path and the store writer.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};

use serde::Serialize;

/// Feed connector lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedState {
    Disconnected,
    Connecting,
    Connected,
}

impl FeedState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => FeedState::Connecting,
            2 => FeedState::Connected,
            _ => FeedState::Disconnected,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            FeedState::Disconnected => 0,
            FeedState::Connecting => 1,
            FeedState::Connected => 2,
        }
    }
}

impl std::fmt::Display for FeedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FeedState::Disconnected => "disconnected",
            FeedState::Connecting => "connecting",
            FeedState::Connected => "connected",
        };
        write!(f, "{s}")
    }
}

/// Shared health metrics. Updated by pipeline components, read by API and reporter.
#[derive(Default)]
pub struct HealthState {
    feed_state: AtomicU8,
    /// Number of times the feed has reached `Connected`.
    connects: AtomicU64,
    /// Unix seconds of the last qualifying trade (0 = none).
    last_trade_at: AtomicI64,
    /// Approximate count of store events queued for the DB writer.
    write_queue_pending: AtomicU64,
    /// True once shutdown has begun.
    shutting_down: AtomicBool,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_feed_state(&self, state: FeedState) {
        self.feed_state.store(state.as_u8(), Ordering::Relaxed);
        if state == FeedState::Connected {
            self.connects.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn feed_state(&self) -> FeedState {
        FeedState::from_u8(self.feed_state.load(Ordering::Relaxed))
    }

    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    pub fn set_last_trade_at(&self, ts: i64) {
        self.last_trade_at.fetch_max(ts, Ordering::Relaxed);
    }

    pub fn last_trade_at(&self) -> i64 {
        self.last_trade_at.load(Ordering::Relaxed)
    }

    pub fn inc_write_queue_pending(&self) {
        self.write_queue_pending.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_write_queue_pending(&self) {
        let _ = self
            .write_queue_pending
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }

    pub fn write_queue_pending(&self) -> u64 {
        self.write_queue_pending.load(Ordering::Relaxed)
    }

    pub fn set_shutting_down(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
    }

    pub fn shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }
}
