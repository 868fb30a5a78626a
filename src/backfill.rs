use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::Result;
use crate::ingest::Ingestor;
use crate::state::market_store::now_secs;
use crate::types::TradeEvent;
use crate::ws::messages::RawTrade;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct BackfillStats {
    pub api_total: usize,
    pub rejected_malformed: usize,
    /// Trades that passed both filter stages and reached the table.
    pub qualified: usize,
}

pub fn trades_url(base: &str, limit: usize, start: i64) -> String {
    format!("{}/trades?limit={}&start={}", base.trim_end_matches('/'), limit, start)
}

/// Decode a `/trades` response. Rows missing required fields are counted and dropped;
/// the rest are returned oldest first.
pub fn decode_trades(resp: Value) -> Result<(Vec<TradeEvent>, usize)> {
    let rows: Vec<Value> = serde_json::from_value(resp)?;
    let total = rows.len();

    let mut trades: Vec<TradeEvent> = rows
        .into_iter()
        .filter_map(|row| serde_json::from_value::<RawTrade>(row).ok())
        .filter_map(RawTrade::into_event)
        .collect();
    trades.sort_by_key(|t| t.timestamp);

    let malformed = total - trades.len();
    Ok((trades, malformed))
}

/// Fetch the last `backfill_lookback_secs` of trades from the data API.
pub async fn fetch_recent_trades(cfg: &Config) -> Result<(Vec<TradeEvent>, BackfillStats)> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    let start = now_secs() - cfg.backfill_lookback_secs as i64;
    let url = trades_url(&cfg.data_api_url, cfg.backfill_limit, start);
    debug!("[BACKFILL] GET {url}");

    let resp: Value = client.get(&url).send().await?.error_for_status()?.json().await?;
    let (trades, malformed) = decode_trades(resp)?;

    let stats = BackfillStats {
        api_total: trades.len() + malformed,
        rejected_malformed: malformed,
        qualified: 0,
    };
    Ok((trades, stats))
}

/// Push historical trades through the same filter and upsert path as the live feed.
/// Runs before the feed connects, so the queue is bypassed.
pub async fn run_backfill(cfg: &Config, ingestor: &Ingestor) -> Result<BackfillStats> {
    let (trades, mut stats) = fetch_recent_trades(cfg).await?;
    for trade in trades {
        if ingestor.ingest(trade).await.is_some() {
            stats.qualified += 1;
        }
    }
    info!(
        "[BACKFILL] complete: {} rows fetched, {} malformed, {} qualified",
        stats.api_total, stats.rejected_malformed, stats.qualified
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(cond: &str, ts: i64, size: f64) -> Value {
        json!({
            "proxyWallet": "0xw",
            "side": "BUY",
            "conditionId": cond,
            "size": size,
            "price": 0.4,
            "timestamp": ts,
            "title": "Will the Fed cut in March?",
            "slug": "fed-cut-march",
            "eventSlug": "fed-decision-march",
            "outcome": "Yes",
            "outcomeIndex": 0,
            "transactionHash": format!("0x{cond}{ts}")
        })
    }

    #[test]
    fn url_includes_limit_and_start() {
        assert_eq!(
            trades_url("https://data-api.polymarket.com/", 500, 1_700_000_000),
            "https://data-api.polymarket.com/trades?limit=500&start=1700000000"
        );
    }

    #[test]
    fn rows_sorted_oldest_first() {
        let resp = json!([row("c", 300, 9000.0), row("a", 100, 9000.0), row("b", 200, 9000.0)]);
        let (trades, malformed) = decode_trades(resp).unwrap();
        assert_eq!(malformed, 0);
        let ids: Vec<&str> = trades.iter().map(|t| t.market_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(trades[0].event_slug, "fed-decision-march");
    }

    #[test]
    fn incomplete_rows_dropped() {
        let mut no_title = row("x", 100, 9000.0);
        no_title["title"] = Value::Null;
        let mut no_wallet = row("y", 100, 9000.0);
        no_wallet.as_object_mut().unwrap().remove("proxyWallet");
        let resp = json!([row("a", 100, 9000.0), no_title, no_wallet, "garbage", row("z", 100, 0.0)]);

        let (trades, malformed) = decode_trades(resp).unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(malformed, 4);
    }

    #[test]
    fn non_array_response_is_an_error() {
        assert!(decode_trades(json!({"error": "rate limited"})).is_err());
    }
}
