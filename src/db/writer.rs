use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::api::health::HealthState;
use crate::config::{CONTRARIAN_WINDOW_SECS, STORE_RETRY_DELAY_MS, STORE_WRITE_ATTEMPTS};
use crate::db::models::OpposingTradeRow;
use crate::error::Result;
use crate::state::market_store::now_secs;
use crate::types::{ConsensusPick, MarketDecision, MarketRecord, StoreEvent, Tier, TradeEvent};

/// Receives StoreEvents from the pipeline and applies them to SQLite.
/// Runs as a dedicated background task; the ingest path never waits on it.
pub struct DbWriter {
    pool: SqlitePool,
    rx: mpsc::Receiver<StoreEvent>,
    health: Arc<HealthState>,
}

impl DbWriter {
    pub fn new(pool: SqlitePool, rx: mpsc::Receiver<StoreEvent>, health: Arc<HealthState>) -> Self {
        Self { pool, rx, health }
    }

    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            apply_with_retry(&self.pool, &event).await;
            self.health.dec_write_queue_pending();
        }
        info!("[DB] store channel closed, writer exiting");
    }
}

/// Up to `STORE_WRITE_ATTEMPTS` tries, `STORE_RETRY_DELAY_MS` apart; then the event is dropped.
async fn apply_with_retry(pool: &SqlitePool, event: &StoreEvent) {
    for attempt in 1..=STORE_WRITE_ATTEMPTS {
        match apply(pool, event).await {
            Ok(()) => return,
            Err(e) if attempt < STORE_WRITE_ATTEMPTS => {
                warn!(kind = event.kind(), attempt, "[DB] write failed, retrying: {e}");
                tokio::time::sleep(Duration::from_millis(STORE_RETRY_DELAY_MS)).await;
            }
            Err(e) => {
                error!(kind = event.kind(), "[DB] write failed after {attempt} attempts, dropping: {e}");
            }
        }
    }
}

pub async fn apply(pool: &SqlitePool, event: &StoreEvent) -> Result<()> {
    match event {
        StoreEvent::UpsertMarket { record, tier } => upsert_market(pool, record, *tier).await,
        StoreEvent::RecordTrade { trade, tier } => record_trade(pool, trade, *tier).await,
        StoreEvent::TrackTradePrice { market_id, outcome, price, at } => {
            sqlx::query(
                "INSERT INTO price_points (market_id, outcome, price, recorded_at) VALUES (?, ?, ?, ?)",
            )
            .bind(market_id)
            .bind(outcome)
            .bind(*price)
            .bind(*at)
            .execute(pool)
            .await?;
            Ok(())
        }
        StoreEvent::CheckContrarianWhale { trade, tier } => {
            check_contrarian_whale(pool, trade, *tier).await.map(|_| ())
        }
        StoreEvent::MarkAnalyzed { ids } => mark_analyzed(pool, ids).await,
        StoreEvent::RecordPredictions { decisions } => record_predictions(pool, decisions).await,
        StoreEvent::RecordConsensus { picks } => record_consensus(pool, picks).await,
    }
}

/// Insert or refresh a market. `first_seen` and `analyzed` of an existing row are kept.
async fn upsert_market(pool: &SqlitePool, r: &MarketRecord, tier: Option<Tier>) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO markets (
            market_id, event_slug, title, outcome, price, size_usd, tier,
            first_seen, last_trade_at, updated_at, analyzed
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(market_id) DO UPDATE SET
            event_slug = excluded.event_slug,
            title = excluded.title,
            outcome = excluded.outcome,
            price = excluded.price,
            size_usd = excluded.size_usd,
            tier = COALESCE(excluded.tier, markets.tier),
            last_trade_at = excluded.last_trade_at,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&r.market_id)
    .bind(&r.event_slug)
    .bind(&r.title)
    .bind(&r.outcome)
    .bind(r.price)
    .bind(r.size_usd)
    .bind(tier.map(|t| t.to_string()))
    .bind(r.first_seen)
    .bind(r.last_trade_at)
    .bind(r.updated_at)
    .bind(r.analyzed)
    .execute(pool)
    .await?;
    Ok(())
}

/// Duplicate deliveries of the same fill are ignored.
async fn record_trade(pool: &SqlitePool, t: &TradeEvent, tier: Option<Tier>) -> Result<()> {
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO trades (
            market_id, event_slug, title, outcome, outcome_index, side, price, size_usd,
            wallet, tx_hash, trader_name, tier, traded_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&t.market_id)
    .bind(&t.event_slug)
    .bind(&t.title)
    .bind(&t.outcome)
    .bind(i64::from(t.outcome_index))
    .bind(t.side.to_string())
    .bind(t.price)
    .bind(t.size_usd)
    .bind(&t.wallet)
    .bind(&t.tx_hash)
    .bind(&t.trader_name)
    .bind(tier.map(|x| x.to_string()))
    .bind(t.timestamp)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        debug!(market_id = %t.market_id, "[DB] duplicate trade ignored");
    }
    Ok(())
}

/// Looks for a whale trade by another wallet on a different outcome of the same market
/// within the last 24h of `t`. Records and returns the match, if any. A fill that already
/// raised an alert returns `None`.
pub async fn check_contrarian_whale(
    pool: &SqlitePool,
    t: &TradeEvent,
    tier: Option<Tier>,
) -> Result<Option<OpposingTradeRow>> {
    let opposing: Option<OpposingTradeRow> = sqlx::query_as(
        r#"
        SELECT wallet, outcome, size_usd, traded_at
        FROM trades
        WHERE market_id = ? AND outcome <> ? AND wallet <> ? AND traded_at >= ? AND traded_at <= ?
        ORDER BY traded_at DESC
        LIMIT 1
        "#,
    )
    .bind(&t.market_id)
    .bind(&t.outcome)
    .bind(&t.wallet)
    .bind(t.timestamp - CONTRARIAN_WINDOW_SECS)
    .bind(t.timestamp)
    .fetch_optional(pool)
    .await?;

    let Some(prior) = opposing else {
        return Ok(None);
    };

    let inserted = sqlx::query(
        r#"
        INSERT OR IGNORE INTO contrarian_alerts (
            market_id, title, wallet, outcome, size_usd, tier,
            prior_wallet, prior_outcome, prior_size_usd, tx_hash, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&t.market_id)
    .bind(&t.title)
    .bind(&t.wallet)
    .bind(&t.outcome)
    .bind(t.size_usd)
    .bind(tier.map(|x| x.to_string()))
    .bind(&prior.wallet)
    .bind(&prior.outcome)
    .bind(prior.size_usd)
    .bind(&t.tx_hash)
    .bind(now_secs())
    .execute(pool)
    .await?;

    if inserted.rows_affected() == 0 {
        debug!(market_id = %t.market_id, "[DB] contrarian alert already recorded");
        return Ok(None);
    }

    info!(
        event = "CONTRARIAN_WHALE",
        market_id = %t.market_id,
        "[DB] contrarian whale | ${:.0} on {} vs ${:.0} on {} ({}s earlier) | {}",
        t.size_usd,
        t.outcome,
        prior.size_usd,
        prior.outcome,
        t.timestamp - prior.traded_at,
        t.title,
    );
    Ok(Some(prior))
}

async fn mark_analyzed(pool: &SqlitePool, ids: &[String]) -> Result<()> {
    let mut tx = pool.begin().await?;
    for id in ids {
        sqlx::query("UPDATE markets SET analyzed = 1 WHERE market_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

async fn record_predictions(pool: &SqlitePool, decisions: &[MarketDecision]) -> Result<()> {
    let now = now_secs();
    let mut tx = pool.begin().await?;
    for d in decisions {
        sqlx::query(
            "INSERT INTO predictions (market_id, decision, confidence, reasoning, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&d.market_id)
        .bind(d.decision.to_string())
        .bind(i64::from(d.confidence))
        .bind(&d.reasoning)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

async fn record_consensus(pool: &SqlitePool, picks: &[ConsensusPick]) -> Result<()> {
    let now = now_secs();
    let mut tx = pool.begin().await?;
    for p in picks {
        sqlx::query(
            "INSERT INTO consensus_picks (market_id, decision, pick_rank, rationale, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&p.market_id)
        .bind(p.decision.to_string())
        .bind(i64::from(p.rank))
        .bind(&p.rationale)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}
