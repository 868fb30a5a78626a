use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::analysis::prompt::{
    build_batch_prompt, build_consensus_prompt, parse_consensus, parse_decisions,
    CONSENSUS_SYSTEM, REASONING_SYSTEM,
};
use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::config::AnalysisConfig;
use crate::llm::Llm;
use crate::state::MarketStore;
use crate::types::{MarketRecord, StoreEvent};

/// Lifetime analysis counters, read by the status reporter and the API.
#[derive(Debug, Default)]
pub struct AnalysisCounters {
    pub predictions: AtomicU64,
    pub consensus_picks: AtomicU64,
    pub ticks_run: AtomicU64,
    pub ticks_skipped: AtomicU64,
}

impl AnalysisCounters {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not enough unanalyzed markets.
    Skipped { candidates: usize },
    Completed { analyzed: usize, decisions: usize, picks: usize },
}

/// Unanalyzed markets, most recent trade first, at most `batch_size`.
pub fn select_candidates(snapshot: Vec<MarketRecord>, batch_size: usize) -> Vec<MarketRecord> {
    let mut candidates: Vec<MarketRecord> = snapshot.into_iter().filter(|m| !m.analyzed).collect();
    candidates.sort_by(|a, b| {
        b.last_trade_at
            .cmp(&a.last_trade_at)
            .then_with(|| a.market_id.cmp(&b.market_id))
    });
    candidates.truncate(batch_size);
    candidates
}

/// Periodically submits the freshest unanalyzed markets to the reasoning collaborator.
pub struct AnalysisScheduler {
    store: Arc<MarketStore>,
    llm: Arc<dyn Llm>,
    cfg: AnalysisConfig,
    store_tx: mpsc::Sender<StoreEvent>,
    counters: Arc<AnalysisCounters>,
    latency: Arc<LatencyStats>,
    health: Arc<HealthState>,
}

impl AnalysisScheduler {
    pub fn new(
        store: Arc<MarketStore>,
        llm: Arc<dyn Llm>,
        cfg: AnalysisConfig,
        store_tx: mpsc::Sender<StoreEvent>,
        counters: Arc<AnalysisCounters>,
        latency: Arc<LatencyStats>,
        health: Arc<HealthState>,
    ) -> Self {
        Self { store, llm, cfg, store_tx, counters, latency, health }
    }

    pub async fn run(self) {
        info!(
            "[ANALYSIS] scheduler started: every {}s, batch {} (min {}), consensus {}",
            self.cfg.interval.as_secs(),
            self.cfg.batch_size,
            self.cfg.min_batch,
            if self.cfg.consensus_enabled { "on" } else { "off" },
        );
        let mut interval = tokio::time::interval(self.cfg.interval);
        interval.tick().await; // consume immediate first tick

        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    pub async fn tick(&self) -> TickOutcome {
        let batch = select_candidates(self.store.snapshot(), self.cfg.batch_size);
        if batch.len() < self.cfg.min_batch {
            self.counters.ticks_skipped.fetch_add(1, Ordering::Relaxed);
            info!(
                "[ANALYSIS] {} unanalyzed market(s), need {}; skipping tick",
                batch.len(),
                self.cfg.min_batch
            );
            return TickOutcome::Skipped { candidates: batch.len() };
        }
        self.counters.ticks_run.fetch_add(1, Ordering::Relaxed);
        info!("[ANALYSIS] analyzing {} markets with {}", batch.len(), self.llm.name());

        let first = self.ask(REASONING_SYSTEM, &build_batch_prompt(&batch)).await;
        let decisions = parse_decisions(&first, &batch);

        let picks = if self.cfg.consensus_enabled && !first.is_empty() {
            let prompt = build_consensus_prompt(&first, self.cfg.consensus_top_picks);
            let second = self.ask(CONSENSUS_SYSTEM, &prompt).await;
            parse_consensus(&second, &batch, self.cfg.consensus_top_picks)
        } else {
            Vec::new()
        };

        // Marked regardless of how the collaborator fared so a bad batch is not retried forever.
        let ids: Vec<String> = batch.iter().map(|m| m.market_id.clone()).collect();
        let analyzed = self.store.mark_analyzed(ids.iter().map(String::as_str));
        self.publish(StoreEvent::MarkAnalyzed { ids });

        for d in &decisions {
            info!(
                market_id = %d.market_id,
                decision = %d.decision,
                confidence = d.confidence,
                "[ANALYSIS] {} {} ({}%)",
                d.market_id, d.decision, d.confidence
            );
        }
        for p in &picks {
            info!(market_id = %p.market_id, "[ANALYSIS] consensus #{} {} {}", p.rank, p.market_id, p.decision);
        }

        let (n_decisions, n_picks) = (decisions.len(), picks.len());
        self.counters.predictions.fetch_add(n_decisions as u64, Ordering::Relaxed);
        self.counters.consensus_picks.fetch_add(n_picks as u64, Ordering::Relaxed);
        if !decisions.is_empty() {
            self.publish(StoreEvent::RecordPredictions { decisions });
        }
        if !picks.is_empty() {
            self.publish(StoreEvent::RecordConsensus { picks });
        }

        TickOutcome::Completed { analyzed, decisions: n_decisions, picks: n_picks }
    }

    /// One bounded collaborator call. Errors and timeouts degrade to an empty reply.
    async fn ask(&self, system: &str, user: &str) -> String {
        let started = Instant::now();
        let result =
            tokio::time::timeout(self.cfg.reasoning_timeout, self.llm.complete(system, user)).await;
        self.latency.record(started.elapsed());

        match result {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!("[ANALYSIS] reasoning call failed: {e}");
                String::new()
            }
            Err(_) => {
                warn!(
                    "[ANALYSIS] reasoning call timed out after {}s",
                    self.cfg.reasoning_timeout.as_secs()
                );
                String::new()
            }
        }
    }

    fn publish(&self, event: StoreEvent) {
        let kind = event.kind();
        match self.store_tx.try_send(event) {
            Ok(()) => self.health.inc_write_queue_pending(),
            Err(e) => warn!(kind, "[DB] store channel unavailable, dropping event: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::error::{AppError, Result};
    use crate::types::MarketRow;

    enum Mode {
        Reply,
        Fail,
        Hang,
    }

    /// Answers the batch call with a YES for every listed market and the consensus call
    /// with the first market only.
    struct MockLlm {
        mode: Mode,
        calls: Mutex<Vec<String>>,
    }

    impl MockLlm {
        fn new(mode: Mode) -> Arc<Self> {
            Arc::new(Self { mode, calls: Mutex::new(Vec::new()) })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Llm for MockLlm {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn complete(&self, system: &str, user: &str) -> Result<String> {
            self.calls.lock().unwrap().push(user.to_string());
            match self.mode {
                Mode::Fail => return Err(AppError::Llm("upstream 503".to_string())),
                Mode::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                }
                Mode::Reply => {}
            }
            let ids: Vec<&str> = user
                .lines()
                .filter_map(|l| l.trim().strip_prefix("market_id: "))
                .collect();
            if system == CONSENSUS_SYSTEM {
                let first = user.split("\"market_id\":\"").nth(1).and_then(|s| s.split('"').next());
                return Ok(format!(
                    r#"[{{"market_id":"{}","decision":"YES","rank":1,"rationale":"strongest"}}]"#,
                    first.unwrap_or_default()
                ));
            }
            let items: Vec<String> = ids
                .iter()
                .map(|id| format!(r#"{{"market_id":"{id}","decision":"YES","confidence":70,"reasoning":"flow"}}"#))
                .collect();
            Ok(format!("[{}]", items.join(",")))
        }
    }

    fn cfg() -> AnalysisConfig {
        AnalysisConfig {
            interval: Duration::from_secs(300),
            batch_size: 3,
            min_batch: 3,
            consensus_enabled: true,
            consensus_top_picks: 2,
            reasoning_timeout: Duration::from_millis(100),
        }
    }

    fn seed(store: &MarketStore, n: usize) {
        for i in 0..n {
            store.upsert_at(
                MarketRow {
                    market_id: format!("m{i}"),
                    event_slug: format!("event-{i}"),
                    title: format!("Market {i}"),
                    outcome: "Yes".to_string(),
                    price: 0.5,
                    size_usd: 10_000.0,
                    trade_ts: 1_000 + i as i64,
                },
                10_000,
            );
        }
    }

    fn scheduler(
        store: Arc<MarketStore>,
        llm: Arc<MockLlm>,
        cfg: AnalysisConfig,
    ) -> (AnalysisScheduler, mpsc::Receiver<StoreEvent>, Arc<AnalysisCounters>) {
        let (tx, rx) = mpsc::channel(16);
        let counters = Arc::new(AnalysisCounters::new());
        let s = AnalysisScheduler::new(
            store,
            llm,
            cfg,
            tx,
            Arc::clone(&counters),
            Arc::new(LatencyStats::new()),
            Arc::new(HealthState::new()),
        );
        (s, rx, counters)
    }

    #[test]
    fn candidates_most_recent_first() {
        let store = MarketStore::new();
        seed(&store, 5);
        store.mark_analyzed(["m4"]);
        let picked = select_candidates(store.snapshot(), 3);
        let ids: Vec<&str> = picked.iter().map(|m| m.market_id.as_str()).collect();
        assert_eq!(ids, vec!["m3", "m2", "m1"]);
    }

    #[tokio::test]
    async fn skips_when_below_minimum() {
        let store = MarketStore::new();
        seed(&store, 2);
        let llm = MockLlm::new(Mode::Reply);
        let (s, mut rx, counters) = scheduler(Arc::clone(&store), Arc::clone(&llm), cfg());

        assert_eq!(s.tick().await, TickOutcome::Skipped { candidates: 2 });
        assert!(llm.calls().is_empty());
        assert!(rx.try_recv().is_err());
        assert_eq!(counters.ticks_skipped.load(Ordering::Relaxed), 1);
        assert!(store.snapshot().iter().all(|m| !m.analyzed));
    }

    #[tokio::test]
    async fn analyzed_markets_excluded_from_next_tick() {
        let store = MarketStore::new();
        seed(&store, 4);
        let llm = MockLlm::new(Mode::Reply);
        let mut config = cfg();
        config.min_batch = 1;
        let (s, mut rx, counters) = scheduler(Arc::clone(&store), Arc::clone(&llm), config);

        let first = s.tick().await;
        assert_eq!(first, TickOutcome::Completed { analyzed: 3, decisions: 3, picks: 1 });
        let calls = llm.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].contains("https://polymarket.com/event/event-3"));
        assert!(!calls[0].contains("market_id: m0"));

        match rx.try_recv().unwrap() {
            StoreEvent::MarkAnalyzed { ids } => assert_eq!(ids, vec!["m3", "m2", "m1"]),
            other => panic!("unexpected {}", other.kind()),
        }
        assert!(matches!(rx.try_recv().unwrap(), StoreEvent::RecordPredictions { decisions } if decisions.len() == 3));
        assert!(matches!(rx.try_recv().unwrap(), StoreEvent::RecordConsensus { picks } if picks[0].market_id == "m3"));

        // Second tick only sees the one market left.
        let second = s.tick().await;
        assert_eq!(second, TickOutcome::Completed { analyzed: 1, decisions: 1, picks: 1 });
        assert!(llm.calls()[2].contains("market_id: m0"));
        assert!(store.snapshot().iter().all(|m| m.analyzed));
        assert_eq!(counters.predictions.load(Ordering::Relaxed), 4);
        assert_eq!(counters.ticks_run.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn collaborator_error_still_marks_analyzed() {
        let store = MarketStore::new();
        seed(&store, 3);
        let llm = MockLlm::new(Mode::Fail);
        let (s, mut rx, _) = scheduler(Arc::clone(&store), Arc::clone(&llm), cfg());

        let outcome = s.tick().await;
        assert_eq!(outcome, TickOutcome::Completed { analyzed: 3, decisions: 0, picks: 0 });
        // Empty first response: no consensus request.
        assert_eq!(llm.calls().len(), 1);
        assert!(store.snapshot().iter().all(|m| m.analyzed));
        assert!(matches!(rx.try_recv().unwrap(), StoreEvent::MarkAnalyzed { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn timeout_degrades_to_empty_response() {
        let store = MarketStore::new();
        seed(&store, 3);
        let llm = MockLlm::new(Mode::Hang);
        let (s, _rx, _) = scheduler(Arc::clone(&store), Arc::clone(&llm), cfg());

        let outcome = tokio::time::timeout(Duration::from_secs(5), s.tick()).await.unwrap();
        assert_eq!(outcome, TickOutcome::Completed { analyzed: 3, decisions: 0, picks: 0 });
    }

    #[tokio::test]
    async fn consensus_can_be_disabled() {
        let store = MarketStore::new();
        seed(&store, 3);
        let llm = MockLlm::new(Mode::Reply);
        let mut config = cfg();
        config.consensus_enabled = false;
        let (s, _rx, counters) = scheduler(Arc::clone(&store), Arc::clone(&llm), config);

        s.tick().await;
        assert_eq!(llm.calls().len(), 1);
        assert_eq!(counters.consensus_picks.load(Ordering::Relaxed), 0);
    }
}
