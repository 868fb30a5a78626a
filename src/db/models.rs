//! Row types for the runtime queries in `writer` and `snapshot`.

use crate::types::MarketRecord;

#[derive(Debug, sqlx::FromRow)]
pub struct MarketDbRow {
    pub market_id: String,
    pub event_slug: String,
    pub title: String,
    pub outcome: String,
    pub price: f64,
    pub size_usd: f64,
    pub first_seen: i64,
    pub last_trade_at: i64,
    pub updated_at: i64,
    pub analyzed: bool,
}

impl From<MarketDbRow> for MarketRecord {
    fn from(r: MarketDbRow) -> Self {
        Self {
            market_id: r.market_id,
            event_slug: r.event_slug,
            title: r.title,
            outcome: r.outcome,
            price: r.price,
            size_usd: r.size_usd,
            first_seen: r.first_seen,
            last_trade_at: r.last_trade_at,
            updated_at: r.updated_at,
            analyzed: r.analyzed,
        }
    }
}

/// The most recent opposing whale trade found by the contrarian check.
#[derive(Debug, sqlx::FromRow)]
pub struct OpposingTradeRow {
    pub wallet: String,
    pub outcome: String,
    pub size_usd: f64,
    pub traded_at: i64,
}
