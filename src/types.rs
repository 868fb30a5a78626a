use serde::{Deserialize, Serialize};

use crate::config::MARKET_LINK_BASE;

// ---------------------------------------------------------------------------
// Trade events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("buy") {
            Some(Side::Buy)
        } else if s.eq_ignore_ascii_case("sell") {
            Some(Side::Sell)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// A validated trade decoded from the live feed or a backfill row.
/// `size_usd` is the notional as reported by the venue; it is never multiplied by price.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeEvent {
    pub market_id: String,
    pub event_slug: String,
    pub title: String,
    pub outcome: String,
    pub price: f64,
    pub size_usd: f64,
    pub wallet: String,
    pub side: Side,
    pub outcome_index: u32,
    pub tx_hash: Option<String>,
    pub trader_name: Option<String>,
    /// Unix seconds at the source.
    pub timestamp: i64,
}

// ---------------------------------------------------------------------------
// Tiers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Tier::Bronze => "bronze",
            Tier::Silver => "silver",
            Tier::Gold => "gold",
            Tier::Platinum => "platinum",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Market aggregation
// ---------------------------------------------------------------------------

/// Upsert input derived from a qualifying trade.
#[derive(Debug, Clone)]
pub struct MarketRow {
    pub market_id: String,
    pub event_slug: String,
    pub title: String,
    pub outcome: String,
    pub price: f64,
    pub size_usd: f64,
    pub trade_ts: i64,
}

impl From<&TradeEvent> for MarketRow {
    fn from(t: &TradeEvent) -> Self {
        Self {
            market_id: t.market_id.clone(),
            event_slug: t.event_slug.clone(),
            title: t.title.clone(),
            outcome: t.outcome.clone(),
            price: t.price,
            size_usd: t.size_usd,
            trade_ts: t.timestamp,
        }
    }
}

/// Rolling per-market record. Timestamps are unix seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketRecord {
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

impl MarketRecord {
    pub fn link(&self) -> String {
        format!("{}/{}", MARKET_LINK_BASE, self.event_slug)
    }
}

// ---------------------------------------------------------------------------
// Collaborator payloads
// ---------------------------------------------------------------------------

/// Stage-2 semantic filter decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticVerdict {
    pub should_include: bool,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub emotional_level: String,
    #[serde(default)]
    pub reason: String,
}

impl SemanticVerdict {
    /// Verdict used when the collaborator is unavailable: let the trade through.
    pub fn fail_open(reason: impl Into<String>) -> Self {
        Self {
            should_include: true,
            category: "unclassified".to_string(),
            emotional_level: "unknown".to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_fail_open(&self) -> bool {
        self.should_include && self.category == "unclassified"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Yes,
    No,
    Skip,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Yes => write!(f, "YES"),
            Direction::No => write!(f, "NO"),
            Direction::Skip => write!(f, "SKIP"),
        }
    }
}

/// One per-market decision from the reasoning collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDecision {
    pub market_id: String,
    pub decision: Direction,
    #[serde(default)]
    pub confidence: u8,
    #[serde(default)]
    pub reasoning: String,
}

/// A market re-ranked into the consensus list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusPick {
    pub market_id: String,
    pub decision: Direction,
    pub rank: u32,
    #[serde(default)]
    pub rationale: String,
}

// ---------------------------------------------------------------------------
// Durable store events, published after the core mutation, applied by DbWriter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum StoreEvent {
    UpsertMarket { record: MarketRecord, tier: Option<Tier> },
    RecordTrade { trade: TradeEvent, tier: Option<Tier> },
    TrackTradePrice { market_id: String, outcome: String, price: f64, at: i64 },
    CheckContrarianWhale { trade: TradeEvent, tier: Option<Tier> },
    MarkAnalyzed { ids: Vec<String> },
    RecordPredictions { decisions: Vec<MarketDecision> },
    RecordConsensus { picks: Vec<ConsensusPick> },
}

impl StoreEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreEvent::UpsertMarket { .. } => "upsert_market",
            StoreEvent::RecordTrade { .. } => "record_trade",
            StoreEvent::TrackTradePrice { .. } => "track_trade_price",
            StoreEvent::CheckContrarianWhale { .. } => "check_contrarian_whale",
            StoreEvent::MarkAnalyzed { .. } => "mark_analyzed",
            StoreEvent::RecordPredictions { .. } => "record_predictions",
            StoreEvent::RecordConsensus { .. } => "record_consensus",
        }
    }
}
