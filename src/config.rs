use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::filter::classifier::TierThresholds;

pub const WS_URL: &str = "wss://ws-live-data.polymarket.com";
pub const DATA_API_URL: &str = "https://data-api.polymarket.com";
pub const LLM_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const LLM_MODEL: &str = "anthropic/claude-sonnet-4";

/// Public event page for a market's event group.
pub const MARKET_LINK_BASE: &str = "https://polymarket.com/event";

/// Minimum trade notional (USD) for a trade to count as a whale trade. Inclusive.
pub const MIN_TRADE_SIZE_USD: f64 = 5_000.0;

/// Trades priced at or below / at or above these bounds are near-certain outcomes.
pub const IGNORE_PRICE_LOW: f64 = 0.05;
pub const IGNORE_PRICE_HIGH: f64 = 0.95;

/// Tier lower bounds in USD (half-open intervals).
pub mod tier_thresholds {
    pub const BRONZE: f64 = 5_000.0;
    pub const SILVER: f64 = 15_000.0;
    pub const GOLD: f64 = 50_000.0;
    pub const PLATINUM: f64 = 100_000.0;
}

pub const CRYPTO_KEYWORDS: &[&str] = &[
    "bitcoin", "btc", "ethereum", "eth", "solana", "crypto", "cryptocurrency", "xrp", "dogecoin",
    "memecoin", "altcoin", "stablecoin", "binance", "coinbase", "updown", "up or down",
];

pub const SPORTS_KEYWORDS: &[&str] = &[
    "nba", "nfl", "mlb", "nhl", "ncaa", "ufc", "fifa", "premier league", "champions league",
    "la liga", "serie a", "bundesliga", "super bowl", "world series", "stanley cup", "tennis",
    "wimbledon", "grand prix", "formula 1", "f1", "golf", "boxing", "cricket",
];

/// Bounded FIFO between the feed connector and the consumer.
pub const QUEUE_CAPACITY: usize = 1000;

/// Fixed delay before reconnecting after the feed closes or errors (seconds).
pub const RECONNECT_DELAY_SECS: u64 = 3;

/// Keepalive ping interval on the feed connection (seconds).
pub const WS_PING_INTERVAL_SECS: u64 = 30;

/// Capacity of the durable store event channel.
pub const STORE_CHANNEL_CAPACITY: usize = 1024;
pub const STORE_WRITE_ATTEMPTS: u32 = 3;
pub const STORE_RETRY_DELAY_MS: u64 = 500;
/// Upper bound on waiting for the store writer to flush at shutdown (seconds).
pub const STORE_DRAIN_TIMEOUT_SECS: u64 = 5;

/// Window for pairing a whale trade with an opposing one on the same market (seconds).
pub const CONTRARIAN_WINDOW_SECS: i64 = 24 * 3600;

pub const ANALYSIS_INTERVAL_SECS: u64 = 300;
pub const ANALYSIS_BATCH_SIZE: usize = 3;
pub const ANALYSIS_MIN_BATCH: usize = 3;
pub const CONSENSUS_TOP_PICKS: usize = 2;
pub const REASONING_TIMEOUT_SECS: u64 = 120;

/// Stage-2 semantic filter call timeout. On expiry the trade is let through.
pub const SEMANTIC_TIMEOUT_SECS: u64 = 15;

pub const STATUS_INTERVAL_SECS: u64 = 30;

pub const BACKFILL_LIMIT: usize = 500;
pub const BACKFILL_LOOKBACK_SECS: u64 = 3600;

/// Stage-1 thresholds and keyword lists.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub min_trade_size_usd: f64,
    pub ignore_price_low: f64,
    pub ignore_price_high: f64,
    /// Lower-cased keywords matched as whole words against title and event slug.
    pub keywords: Vec<String>,
    pub semantic_timeout: Duration,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_trade_size_usd: MIN_TRADE_SIZE_USD,
            ignore_price_low: IGNORE_PRICE_LOW,
            ignore_price_high: IGNORE_PRICE_HIGH,
            keywords: CRYPTO_KEYWORDS
                .iter()
                .chain(SPORTS_KEYWORDS)
                .map(|k| k.to_string())
                .collect(),
            semantic_timeout: Duration::from_secs(SEMANTIC_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub interval: Duration,
    pub batch_size: usize,
    pub min_batch: usize,
    pub consensus_enabled: bool,
    pub consensus_top_picks: usize,
    pub reasoning_timeout: Duration,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(ANALYSIS_INTERVAL_SECS),
            batch_size: ANALYSIS_BATCH_SIZE,
            min_batch: ANALYSIS_MIN_BATCH,
            consensus_enabled: true,
            consensus_top_picks: CONSENSUS_TOP_PICKS,
            reasoning_timeout: Duration::from_secs(REASONING_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    /// None disables the semantic filter (pass-through) and the analysis scheduler.
    pub api_key: Option<String>,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub ws_url: String,
    pub data_api_url: String,
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    pub filter: FilterConfig,
    pub tiers: TierThresholds,
    pub queue_capacity: usize,
    pub reconnect_delay: Duration,
    pub analysis: AnalysisConfig,
    pub status_interval: Duration,
    pub backfill_enabled: bool,
    pub backfill_limit: usize,
    pub backfill_lookback_secs: u64,
    pub llm: LlmConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_url: WS_URL.to_string(),
            data_api_url: DATA_API_URL.to_string(),
            log_level: "info".to_string(),
            db_path: "whales.db".to_string(),
            api_port: 3000,
            filter: FilterConfig::default(),
            tiers: TierThresholds::default(),
            queue_capacity: QUEUE_CAPACITY,
            reconnect_delay: Duration::from_secs(RECONNECT_DELAY_SECS),
            analysis: AnalysisConfig::default(),
            status_interval: Duration::from_secs(STATUS_INTERVAL_SECS),
            backfill_enabled: true,
            backfill_limit: BACKFILL_LIMIT,
            backfill_lookback_secs: BACKFILL_LOOKBACK_SECS,
            llm: LlmConfig {
                base_url: LLM_BASE_URL.to_string(),
                api_key: None,
                model: LLM_MODEL.to_string(),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let d = Self::default();

        let mut keywords = env_list("CRYPTO_KEYWORDS", CRYPTO_KEYWORDS);
        keywords.extend(env_list("SPORTS_KEYWORDS", SPORTS_KEYWORDS));

        let cfg = Self {
            ws_url: env_string("WS_URL", &d.ws_url),
            data_api_url: env_string("DATA_API_URL", &d.data_api_url),
            log_level: env_string("LOG_LEVEL", &d.log_level),
            db_path: env_string("DB_PATH", &d.db_path),
            api_port: env_parse("API_PORT", d.api_port)?,
            filter: FilterConfig {
                min_trade_size_usd: env_parse("MIN_TRADE_SIZE_USD", d.filter.min_trade_size_usd)?,
                ignore_price_low: env_parse("IGNORE_PRICE_LOW", d.filter.ignore_price_low)?,
                ignore_price_high: env_parse("IGNORE_PRICE_HIGH", d.filter.ignore_price_high)?,
                keywords,
                semantic_timeout: Duration::from_secs(env_parse(
                    "SEMANTIC_TIMEOUT_SECS",
                    SEMANTIC_TIMEOUT_SECS,
                )?),
            },
            tiers: TierThresholds {
                bronze: env_parse("TIER_BRONZE_USD", d.tiers.bronze)?,
                silver: env_parse("TIER_SILVER_USD", d.tiers.silver)?,
                gold: env_parse("TIER_GOLD_USD", d.tiers.gold)?,
                platinum: env_parse("TIER_PLATINUM_USD", d.tiers.platinum)?,
            },
            queue_capacity: env_parse("QUEUE_CAPACITY", d.queue_capacity)?,
            reconnect_delay: Duration::from_secs(env_parse(
                "RECONNECT_DELAY_SECS",
                RECONNECT_DELAY_SECS,
            )?),
            analysis: AnalysisConfig {
                interval: Duration::from_secs(env_parse(
                    "ANALYSIS_INTERVAL_SECS",
                    ANALYSIS_INTERVAL_SECS,
                )?),
                batch_size: env_parse("ANALYSIS_BATCH_SIZE", d.analysis.batch_size)?,
                min_batch: env_parse("ANALYSIS_MIN_BATCH", d.analysis.min_batch)?,
                consensus_enabled: env_parse("CONSENSUS_ENABLED", d.analysis.consensus_enabled)?,
                consensus_top_picks: env_parse(
                    "CONSENSUS_TOP_PICKS",
                    d.analysis.consensus_top_picks,
                )?,
                reasoning_timeout: Duration::from_secs(env_parse(
                    "REASONING_TIMEOUT_SECS",
                    REASONING_TIMEOUT_SECS,
                )?),
            },
            status_interval: Duration::from_secs(env_parse(
                "STATUS_INTERVAL_SECS",
                STATUS_INTERVAL_SECS,
            )?),
            backfill_enabled: env_parse("BACKFILL_ENABLED", d.backfill_enabled)?,
            backfill_limit: env_parse("BACKFILL_LIMIT", d.backfill_limit)?,
            backfill_lookback_secs: env_parse("BACKFILL_LOOKBACK_SECS", d.backfill_lookback_secs)?,
            llm: LlmConfig {
                base_url: env_string("LLM_BASE_URL", &d.llm.base_url),
                api_key: std::env::var("LLM_API_KEY").ok().filter(|k| !k.trim().is_empty()),
                model: env_string("LLM_MODEL", &d.llm.model),
            },
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let f = &self.filter;
        if !(0.0..1.0).contains(&f.ignore_price_low)
            || !(0.0..=1.0).contains(&f.ignore_price_high)
            || f.ignore_price_low >= f.ignore_price_high
        {
            return Err(AppError::Config(format!(
                "price ignore band must satisfy 0 <= low < high <= 1 (got {} / {})",
                f.ignore_price_low, f.ignore_price_high
            )));
        }
        if f.min_trade_size_usd <= 0.0 {
            return Err(AppError::Config("MIN_TRADE_SIZE_USD must be positive".to_string()));
        }
        let t = &self.tiers;
        if !(t.bronze > 0.0 && t.bronze < t.silver && t.silver < t.gold && t.gold < t.platinum) {
            return Err(AppError::Config(
                "tier boundaries must be positive and strictly ascending".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(AppError::Config("QUEUE_CAPACITY must be at least 1".to_string()));
        }
        if self.analysis.batch_size == 0 || self.analysis.min_batch > self.analysis.batch_size {
            return Err(AppError::Config(
                "ANALYSIS_MIN_BATCH must not exceed a non-zero ANALYSIS_BATCH_SIZE".to_string(),
            ));
        }
        if self.analysis.interval.is_zero() || self.status_interval.is_zero() {
            return Err(AppError::Config("timer intervals must be non-zero".to_string()));
        }
        Ok(())
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: {raw:?}"))),
        Err(_) => Ok(default),
    }
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}
