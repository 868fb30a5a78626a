use serde::Deserialize;
use serde_json::Value;
use tracing::trace;

use crate::types::{Side, TradeEvent};

/// The only envelope type the pipeline acts on.
pub const ORDERS_MATCHED: &str = "orders_matched";

/// Real-time data envelope: `{ "topic": ..., "type": ..., "payload": {...} }`.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    payload: Option<Value>,
}

/// Trade fields shared by the live feed payload and the data-API `/trades` rows.
/// Every field is optional here; `into_event` enforces what a trade needs.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTrade {
    pub condition_id: Option<String>,
    pub event_slug: Option<String>,
    pub slug: Option<String>,
    pub title: Option<String>,
    pub outcome: Option<String>,
    pub outcome_index: Option<Value>,
    pub price: Option<Value>,
    /// USD notional as reported by the venue.
    pub size: Option<Value>,
    pub proxy_wallet: Option<String>,
    pub side: Option<String>,
    pub transaction_hash: Option<String>,
    pub name: Option<String>,
    pub pseudonym: Option<String>,
    pub timestamp: Option<Value>,
}

impl RawTrade {
    /// Validate and convert. Returns None if any required field is missing or out of
    /// range: price must be strictly inside (0, 1), size positive, market id and title
    /// non-empty.
    pub fn into_event(self) -> Option<TradeEvent> {
        let market_id = non_empty(self.condition_id)?;
        let title = non_empty(self.title)?;
        let event_slug = non_empty(self.event_slug).or_else(|| non_empty(self.slug))?;
        let outcome = non_empty(self.outcome)?;
        let price = self.price.as_ref().and_then(lenient_f64)?;
        let size_usd = self.size.as_ref().and_then(lenient_f64)?;
        let wallet = non_empty(self.proxy_wallet)?;
        let side = self.side.as_deref().and_then(Side::parse)?;
        let timestamp = self.timestamp.as_ref().and_then(lenient_f64).map(normalize_ts)?;
        let outcome_index = self
            .outcome_index
            .as_ref()
            .and_then(lenient_f64)
            .map(|v| v as u32)
            .unwrap_or(0);

        if !(price > 0.0 && price < 1.0) || !(size_usd > 0.0) || !size_usd.is_finite() {
            return None;
        }

        let trader_name = non_empty(self.name).or_else(|| non_empty(self.pseudonym));

        Some(TradeEvent {
            market_id,
            event_slug,
            title,
            outcome,
            price,
            size_usd,
            wallet,
            side,
            outcome_index,
            tx_hash: non_empty(self.transaction_hash),
            trader_name,
            timestamp,
        })
    }
}

/// Parse one feed text frame. Anything that is not a valid `orders_matched` trade
/// (heartbeats, subscription acks, other topics, malformed payloads) yields None.
pub fn parse_feed_frame(raw: &str) -> Option<TradeEvent> {
    let envelope: Envelope = match serde_json::from_str(raw) {
        Ok(e) => e,
        Err(_) => {
            trace!(len = raw.len(), "[FEED] non-JSON frame ignored");
            return None;
        }
    };
    if envelope.kind.as_deref() != Some(ORDERS_MATCHED) {
        return None;
    }
    let raw_trade: RawTrade = serde_json::from_value(envelope.payload?).ok()?;
    let event = raw_trade.into_event();
    if event.is_none() {
        trace!("[FEED] orders_matched payload failed validation");
    }
    event
}

/// Subscription request for the trade-activity topic.
pub fn build_subscribe_msg() -> String {
    serde_json::json!({
        "action": "subscribe",
        "subscriptions": [
            { "topic": "activity", "type": ORDERS_MATCHED }
        ]
    })
    .to_string()
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Numbers arrive either as JSON numbers or numeric strings.
fn lenient_f64(v: &Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Millisecond timestamps are converted to seconds.
fn normalize_ts(ts: f64) -> i64 {
    if ts > 1e12 {
        (ts / 1000.0) as i64
    } else {
        ts as i64
    }
}
