use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;

use crate::types::{MarketRecord, MarketRow};

// ---------------------------------------------------------------------------
// MarketStore: per-market rolling aggregation table
// ---------------------------------------------------------------------------

/// In-memory aggregation table keyed by market id.
///
/// Every mutation and every snapshot goes through `write_gate`, so writers are
/// serialized and a snapshot is a point-in-time copy. Single-record reads (`get`)
/// rely on DashMap's per-shard locking and never see a half-applied upsert.
pub struct MarketStore {
    records: DashMap<String, MarketRecord>,
    write_gate: Mutex<()>,
}

impl MarketStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn gate(&self) -> MutexGuard<'_, ()> {
        // The guarded value is (), so a poisoned lock carries no broken state.
        self.write_gate.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or update the record for `row.market_id` using the current wall clock.
    pub fn upsert(&self, row: MarketRow) -> MarketRecord {
        self.upsert_at(row, now_secs())
    }

    /// Existing record: latest fields overwritten, `first_seen` and `analyzed` kept.
    /// New record: `analyzed = false`, `first_seen = min(now, trade_ts)`.
    /// `last_trade_at` is clamped into `[first_seen, now]` so the timestamp ordering
    /// invariant holds for historical and clock-skewed trades.
    pub fn upsert_at(&self, row: MarketRow, now: i64) -> MarketRecord {
        let _gate = self.gate();
        let mut entry = self
            .records
            .entry(row.market_id.clone())
            .or_insert_with(|| MarketRecord {
                market_id: row.market_id.clone(),
                event_slug: String::new(),
                title: String::new(),
                outcome: String::new(),
                price: 0.0,
                size_usd: 0.0,
                first_seen: row.trade_ts.min(now),
                last_trade_at: 0,
                updated_at: 0,
                analyzed: false,
            });
        let rec = entry.value_mut();
        let updated_at = now.max(rec.updated_at).max(rec.first_seen);
        rec.event_slug = row.event_slug;
        rec.title = row.title;
        rec.outcome = row.outcome;
        rec.price = row.price;
        rec.size_usd = row.size_usd;
        rec.last_trade_at = row.trade_ts.clamp(rec.first_seen, updated_at);
        rec.updated_at = updated_at;
        rec.clone()
    }

    /// Flip `analyzed` on the given ids. Unknown ids are ignored. Returns the number of
    /// records that changed.
    pub fn mark_analyzed<'a, I>(&self, ids: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let _gate = self.gate();
        let mut flipped = 0;
        for id in ids {
            if let Some(mut rec) = self.records.get_mut(id) {
                if !rec.analyzed {
                    rec.analyzed = true;
                    flipped += 1;
                }
            }
        }
        flipped
    }

    /// Point-in-time copy of every record.
    pub fn snapshot(&self) -> Vec<MarketRecord> {
        let _gate = self.gate();
        self.records.iter().map(|e| e.value().clone()).collect()
    }

    /// Seed the table from durable state. Existing entries with the same id are replaced.
    pub fn load(&self, records: Vec<MarketRecord>) {
        let _gate = self.gate();
        for rec in records {
            self.records.insert(rec.market_id.clone(), rec);
        }
    }

    pub fn get(&self, market_id: &str) -> Option<MarketRecord> {
        self.records.get(market_id).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

impl Default for MarketStore {
    fn default() -> Self {
        Self {
            records: DashMap::new(),
            write_gate: Mutex::new(()),
        }
    }
}

pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
