use sqlx::SqlitePool;
use tracing::info;

use crate::db::models::MarketDbRow;
use crate::error::Result;
use crate::types::MarketRecord;

/// Write the full aggregation table in one transaction. The in-memory records are
/// authoritative, including `analyzed`; `first_seen` only ever moves earlier.
pub async fn save_snapshot(pool: &SqlitePool, records: &[MarketRecord]) -> Result<()> {
    let mut tx = pool.begin().await?;
    for r in records {
        sqlx::query(
            r#"
            INSERT INTO markets (
                market_id, event_slug, title, outcome, price, size_usd,
                first_seen, last_trade_at, updated_at, analyzed
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(market_id) DO UPDATE SET
                event_slug = excluded.event_slug,
                title = excluded.title,
                outcome = excluded.outcome,
                price = excluded.price,
                size_usd = excluded.size_usd,
                first_seen = MIN(markets.first_seen, excluded.first_seen),
                last_trade_at = excluded.last_trade_at,
                updated_at = excluded.updated_at,
                analyzed = excluded.analyzed
            "#,
        )
        .bind(&r.market_id)
        .bind(&r.event_slug)
        .bind(&r.title)
        .bind(&r.outcome)
        .bind(r.price)
        .bind(r.size_usd)
        .bind(r.first_seen)
        .bind(r.last_trade_at)
        .bind(r.updated_at)
        .bind(r.analyzed)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    info!("[DB] snapshot saved: {} markets", records.len());
    Ok(())
}

pub async fn load_snapshot(pool: &SqlitePool) -> Result<Vec<MarketRecord>> {
    let rows: Vec<MarketDbRow> = sqlx::query_as(
        r#"
        SELECT market_id, event_slug, title, outcome, price, size_usd,
               first_seen, last_trade_at, updated_at, analyzed
        FROM markets
        ORDER BY last_trade_at DESC
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(MarketRecord::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::state::MarketStore;
    use crate::types::MarketRow;

    fn row(id: &str, ts: i64) -> MarketRow {
        MarketRow {
            market_id: id.to_string(),
            event_slug: format!("{id}-event"),
            title: format!("Market {id}"),
            outcome: "No".to_string(),
            price: 0.35,
            size_usd: 60_000.0,
            trade_ts: ts,
        }
    }

    #[tokio::test]
    async fn table_survives_restart() {
        let pool = test_pool().await;
        let store = MarketStore::new();
        store.upsert_at(row("a", 100), 1_000);
        store.upsert_at(row("b", 900), 1_000);
        store.mark_analyzed(["a"]);
        save_snapshot(&pool, &store.snapshot()).await.unwrap();

        let restored = MarketStore::new();
        restored.load(load_snapshot(&pool).await.unwrap());
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.get("a"), store.get("a"));
        assert!(restored.get("a").unwrap().analyzed);
        assert!(!restored.get("b").unwrap().analyzed);
    }

    #[tokio::test]
    async fn resave_keeps_earliest_first_seen() {
        let pool = test_pool().await;
        let store = MarketStore::new();
        store.upsert_at(row("a", 100), 1_000);
        save_snapshot(&pool, &store.snapshot()).await.unwrap();

        let fresh = MarketStore::new();
        fresh.upsert_at(row("a", 2_000), 2_000);
        save_snapshot(&pool, &fresh.snapshot()).await.unwrap();

        let loaded = load_snapshot(&pool).await.unwrap();
        assert_eq!(loaded[0].first_seen, 100);
        assert_eq!(loaded[0].last_trade_at, 2_000);
    }

    #[tokio::test]
    async fn empty_database_loads_nothing() {
        let pool = test_pool().await;
        assert!(load_snapshot(&pool).await.unwrap().is_empty());
    }
}
