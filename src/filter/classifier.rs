use crate::config::tier_thresholds;
use crate::types::Tier;

/// Lower bounds (USD) of each tier. Intervals are half-open: `[bronze, silver)` is bronze.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierThresholds {
    pub bronze: f64,
    pub silver: f64,
    pub gold: f64,
    pub platinum: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            bronze: tier_thresholds::BRONZE,
            silver: tier_thresholds::SILVER,
            gold: tier_thresholds::GOLD,
            platinum: tier_thresholds::PLATINUM,
        }
    }
}

impl TierThresholds {
    pub fn classify(&self, size_usd: f64) -> Option<Tier> {
        if size_usd >= self.platinum {
            Some(Tier::Platinum)
        } else if size_usd >= self.gold {
            Some(Tier::Gold)
        } else if size_usd >= self.silver {
            Some(Tier::Silver)
        } else if size_usd >= self.bronze {
            Some(Tier::Bronze)
        } else {
            None
        }
    }
}

/// Tier for a trade notional using the default boundaries.
pub fn tier_for(size_usd: f64) -> Option<Tier> {
    TierThresholds::default().classify(size_usd)
}
