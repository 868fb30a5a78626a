use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::api::health::HealthState;
use crate::filter::{FilterOutcome, FilterPipeline, Rejection, TierThresholds};
use crate::state::MarketStore;
use crate::types::{MarketRecord, MarketRow, StoreEvent, TradeEvent};

/// Lifetime ingest counters, read by the status reporter and the API.
#[derive(Debug, Default)]
pub struct IngestStats {
    pub received: AtomicU64,
    pub rejected_stage1: AtomicU64,
    pub rejected_semantic: AtomicU64,
    pub accepted: AtomicU64,
    pub store_events_dropped: AtomicU64,
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Filter → upsert → publish path shared by the live consumer and the backfill.
pub struct Ingestor {
    pipeline: Arc<FilterPipeline>,
    store: Arc<MarketStore>,
    tiers: TierThresholds,
    store_tx: mpsc::Sender<StoreEvent>,
    stats: Arc<IngestStats>,
    health: Arc<HealthState>,
}

impl Ingestor {
    pub fn new(
        pipeline: Arc<FilterPipeline>,
        store: Arc<MarketStore>,
        tiers: TierThresholds,
        store_tx: mpsc::Sender<StoreEvent>,
        stats: Arc<IngestStats>,
        health: Arc<HealthState>,
    ) -> Self {
        Self { pipeline, store, tiers, store_tx, stats, health }
    }

    /// Run one trade to completion. Returns the updated record if the trade qualified.
    pub async fn ingest(&self, trade: TradeEvent) -> Option<MarketRecord> {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        match self.pipeline.evaluate(&trade).await {
            FilterOutcome::Rejected(Rejection::Stage1(_)) => {
                self.stats.rejected_stage1.fetch_add(1, Ordering::Relaxed);
                None
            }
            FilterOutcome::Rejected(Rejection::Semantic { .. }) => {
                self.stats.rejected_semantic.fetch_add(1, Ordering::Relaxed);
                None
            }
            FilterOutcome::Accepted(verdict) => {
                let record = self.store.upsert(MarketRow::from(&trade));
                let tier = self.tiers.classify(trade.size_usd);
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                self.health.set_last_trade_at(record.last_trade_at);

                let tier_label = tier.map(|t| t.to_string()).unwrap_or_else(|| "none".to_string());
                info!(
                    event = "WHALE_TRADE",
                    market_id = %trade.market_id,
                    tier = %tier_label,
                    size_usd = trade.size_usd,
                    price = trade.price,
                    side = %trade.side,
                    category = %verdict.category,
                    "WHALE {} | ${:.0} {} {} @ {:.3} | {}",
                    tier_label, trade.size_usd, trade.side, trade.outcome, trade.price, trade.title,
                );

                self.publish(StoreEvent::UpsertMarket { record: record.clone(), tier });
                self.publish(StoreEvent::TrackTradePrice {
                    market_id: trade.market_id.clone(),
                    outcome: trade.outcome.clone(),
                    price: trade.price,
                    at: record.last_trade_at,
                });
                self.publish(StoreEvent::RecordTrade { trade: trade.clone(), tier });
                self.publish(StoreEvent::CheckContrarianWhale { trade, tier });
                Some(record)
            }
        }
    }

    /// Fire-and-forget: a full store channel never holds up ingestion.
    fn publish(&self, event: StoreEvent) {
        let kind = event.kind();
        match self.store_tx.try_send(event) {
            Ok(()) => self.health.inc_write_queue_pending(),
            Err(e) => {
                self.stats.store_events_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(kind, "[DB] store channel unavailable, dropping event: {e}");
            }
        }
    }
}

/// The single consumer of the trade queue. Each trade is fully filtered and applied
/// before the next one is taken, which keeps per-market updates in arrival order.
pub struct TradeConsumer {
    rx: mpsc::Receiver<TradeEvent>,
    ingestor: Arc<Ingestor>,
}

impl TradeConsumer {
    pub fn new(rx: mpsc::Receiver<TradeEvent>, ingestor: Arc<Ingestor>) -> Self {
        Self { rx, ingestor }
    }

    pub async fn run(mut self) {
        while let Some(trade) = self.rx.recv().await {
            self.ingestor.ingest(trade).await;
        }
        warn!("[QUEUE] trade queue closed, consumer exiting");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::api::latency::LatencyStats;
    use crate::config::FilterConfig;
    use crate::error::Result;
    use crate::filter::SemanticFilter;
    use crate::ingest::queue::trade_queue;
    use crate::types::{SemanticVerdict, Side};

    /// Includes everything; titles ending in `#slow` take longer to classify.
    struct SlowFirst;

    #[async_trait]
    impl SemanticFilter for SlowFirst {
        async fn classify(&self, title: &str, _slug: &str) -> Result<SemanticVerdict> {
            let delay = if title.ends_with("#slow") { 80 } else { 1 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(SemanticVerdict {
                should_include: true,
                category: "politics".to_string(),
                emotional_level: "medium".to_string(),
                reason: String::new(),
            })
        }
    }

    fn trade(market_id: &str, title: &str, price: f64, size_usd: f64, ts: i64) -> TradeEvent {
        TradeEvent {
            market_id: market_id.to_string(),
            event_slug: format!("{market_id}-slug"),
            title: title.to_string(),
            outcome: "Yes".to_string(),
            price,
            size_usd,
            wallet: format!("0xw{ts}"),
            side: Side::Buy,
            outcome_index: 0,
            tx_hash: Some(format!("0xtx{ts}")),
            trader_name: None,
            timestamp: ts,
        }
    }

    fn ingestor(store: Arc<MarketStore>, store_tx: mpsc::Sender<StoreEvent>) -> Arc<Ingestor> {
        let pipeline = FilterPipeline::new(
            &FilterConfig::default(),
            Arc::new(SlowFirst),
            Arc::new(LatencyStats::new()),
        );
        Arc::new(Ingestor::new(
            Arc::new(pipeline),
            store,
            TierThresholds::default(),
            store_tx,
            Arc::new(IngestStats::new()),
            Arc::new(HealthState::new()),
        ))
    }

    #[tokio::test]
    async fn five_trades_three_markets_end_to_end() {
        let store = MarketStore::new();
        let (store_tx, mut store_rx) = mpsc::channel(64);
        let ingestor = ingestor(Arc::clone(&store), store_tx);
        let (queue, rx) = trade_queue(16);

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        let trades = vec![
            trade("a", "Will the Fed cut rates in March?", 0.40, 6_000.0, now - 50),
            trade("b", "Will the UK hold a snap election?", 0.22, 18_000.0, now - 40),
            trade("a", "Will the Fed cut rates in March?", 0.45, 7_500.0, now - 30),
            trade("c", "Will the Senate confirm the nominee?", 0.70, 120_000.0, now - 20),
            trade("b", "Will the UK hold a snap election?", 0.25, 55_000.0, now - 10),
        ];
        for t in trades {
            assert!(queue.offer(t));
        }
        drop(queue);

        TradeConsumer::new(rx, Arc::clone(&ingestor)).run().await;

        let mut snap = store.snapshot();
        snap.sort_by(|x, y| x.market_id.cmp(&y.market_id));
        assert_eq!(snap.len(), 3);
        assert!(snap.iter().all(|r| !r.analyzed));

        assert!((snap[0].price - 0.45).abs() < 1e-9);
        assert!((snap[0].size_usd - 7_500.0).abs() < 1e-9);
        assert_eq!(snap[0].last_trade_at, now - 30);
        assert_eq!(snap[0].first_seen, now - 50);

        assert!((snap[1].price - 0.25).abs() < 1e-9);
        assert!((snap[1].size_usd - 55_000.0).abs() < 1e-9);
        assert_eq!(snap[1].last_trade_at, now - 10);

        assert!((snap[2].size_usd - 120_000.0).abs() < 1e-9);

        assert_eq!(ingestor.stats.accepted.load(Ordering::Relaxed), 5);

        // Four store events per qualifying trade, tier attached to the upsert.
        let mut events = Vec::new();
        while let Ok(e) = store_rx.try_recv() {
            events.push(e);
        }
        assert_eq!(events.len(), 20);
        let platinum = events.iter().any(|e| {
            matches!(e, StoreEvent::UpsertMarket { record, tier: Some(crate::types::Tier::Platinum) } if record.market_id == "c")
        });
        assert!(platinum);
    }

    #[tokio::test]
    async fn updates_apply_in_arrival_order() {
        let store = MarketStore::new();
        let (store_tx, _store_rx) = mpsc::channel(64);
        let ingestor = ingestor(Arc::clone(&store), store_tx);
        let (queue, rx) = trade_queue(16);

        // Same market: the first trade's semantic call is slow. Its verdict is cached
        // for the second, so the consumer must still finish #1 before applying #2.
        assert!(queue.offer(trade("m", "Will the ECB hike? #slow", 0.30, 9_000.0, 1_000)));
        assert!(queue.offer(trade("m", "Will the ECB hike? #slow", 0.60, 11_000.0, 1_001)));
        drop(queue);

        TradeConsumer::new(rx, ingestor).run().await;

        let rec = store.get("m").unwrap();
        assert!((rec.price - 0.60).abs() < 1e-9);
        assert!((rec.size_usd - 11_000.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn rejected_trades_leave_table_untouched() {
        let store = MarketStore::new();
        let (store_tx, mut store_rx) = mpsc::channel(64);
        let ingestor = ingestor(Arc::clone(&store), store_tx);

        assert!(ingestor.ingest(trade("x", "Fed decision", 0.5, 100.0, 1)).await.is_none());
        assert!(ingestor.ingest(trade("y", "Will Bitcoin hit 200k?", 0.5, 90_000.0, 2)).await.is_none());
        assert!(ingestor.ingest(trade("z", "Fed decision", 0.99, 90_000.0, 3)).await.is_none());

        assert_eq!(store.len(), 0);
        assert!(store_rx.try_recv().is_err());
        assert_eq!(ingestor.stats.rejected_stage1.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn full_store_channel_does_not_block_ingest() {
        let store = MarketStore::new();
        let (store_tx, _store_rx) = mpsc::channel(1);
        let ingestor = ingestor(Arc::clone(&store), store_tx);

        let rec = ingestor
            .ingest(trade("m", "Will the Fed cut rates?", 0.5, 8_000.0, 1))
            .await;
        assert!(rec.is_some());
        assert_eq!(ingestor.stats.store_events_dropped.load(Ordering::Relaxed), 3);
    }
}
