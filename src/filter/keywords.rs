use crate::config::FilterConfig;
use crate::types::TradeEvent;

/// Why Stage 1 turned a trade away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage1Rejection {
    BelowMinSize,
    PriceOutOfBand,
    /// Index into the configured keyword list.
    Keyword(usize),
}

/// Stage 1: size, price band and keyword checks. Runs on every inbound trade, so it
/// never allocates.
#[derive(Debug, Clone)]
pub struct KeywordFilter {
    min_trade_size_usd: f64,
    ignore_price_low: f64,
    ignore_price_high: f64,
    keywords: Vec<String>,
}

impl KeywordFilter {
    pub fn new(cfg: &FilterConfig) -> Self {
        Self {
            min_trade_size_usd: cfg.min_trade_size_usd,
            ignore_price_low: cfg.ignore_price_low,
            ignore_price_high: cfg.ignore_price_high,
            keywords: cfg
                .keywords
                .iter()
                .map(|k| k.to_ascii_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn check(&self, trade: &TradeEvent) -> Result<(), Stage1Rejection> {
        if trade.size_usd < self.min_trade_size_usd {
            return Err(Stage1Rejection::BelowMinSize);
        }
        if trade.price <= self.ignore_price_low || trade.price >= self.ignore_price_high {
            return Err(Stage1Rejection::PriceOutOfBand);
        }
        if let Some(idx) = self.matching_keyword(&trade.title, &trade.event_slug) {
            return Err(Stage1Rejection::Keyword(idx));
        }
        Ok(())
    }

    pub fn keyword(&self, idx: usize) -> Option<&str> {
        self.keywords.get(idx).map(|s| s.as_str())
    }

    fn matching_keyword(&self, title: &str, slug: &str) -> Option<usize> {
        self.keywords.iter().position(|kw| {
            contains_word_ignore_ascii_case(title, kw) || contains_word_ignore_ascii_case(slug, kw)
        })
    }
}

/// `needle` must already be lower-case. An alphanumeric edge of `needle` only matches at
/// a word boundary in `haystack`, so "eth" does not hit "Elizabeth" or "ethics".
fn contains_word_ignore_ascii_case(haystack: &str, needle: &str) -> bool {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.is_empty() {
        return true;
    }
    if n.len() > h.len() {
        return false;
    }
    let bound_start = n[0].is_ascii_alphanumeric();
    let bound_end = n[n.len() - 1].is_ascii_alphanumeric();
    h.windows(n.len()).enumerate().any(|(i, w)| {
        let end = i + n.len();
        w.iter().zip(n).all(|(a, b)| a.to_ascii_lowercase() == *b)
            && (!bound_start || i == 0 || !h[i - 1].is_ascii_alphanumeric())
            && (!bound_end || end == h.len() || !h[end].is_ascii_alphanumeric())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;

    fn trade(title: &str, slug: &str, price: f64, size_usd: f64) -> TradeEvent {
        TradeEvent {
            market_id: "0xmarket".to_string(),
            event_slug: slug.to_string(),
            title: title.to_string(),
            outcome: "Yes".to_string(),
            price,
            size_usd,
            wallet: "0xwallet".to_string(),
            side: Side::Buy,
            outcome_index: 0,
            tx_hash: None,
            trader_name: None,
            timestamp: 1_700_000_000,
        }
    }

    fn filter() -> KeywordFilter {
        KeywordFilter::new(&FilterConfig::default())
    }

    #[test]
    fn min_size_is_inclusive() {
        let f = filter();
        let title = "Will the Fed cut rates in March?";
        assert_eq!(
            f.check(&trade(title, "fed-march", 0.4, 4_999.99)),
            Err(Stage1Rejection::BelowMinSize)
        );
        assert_eq!(f.check(&trade(title, "fed-march", 0.4, 5_000.0)), Ok(()));
    }

    #[test]
    fn price_bounds_are_excluded() {
        let f = filter();
        let title = "Will the Fed cut rates in March?";
        assert_eq!(
            f.check(&trade(title, "fed-march", 0.05, 10_000.0)),
            Err(Stage1Rejection::PriceOutOfBand)
        );
        assert_eq!(
            f.check(&trade(title, "fed-march", 0.95, 10_000.0)),
            Err(Stage1Rejection::PriceOutOfBand)
        );
        assert_eq!(
            f.check(&trade(title, "fed-march", 0.01, 10_000.0)),
            Err(Stage1Rejection::PriceOutOfBand)
        );
        assert_eq!(f.check(&trade(title, "fed-march", 0.051, 10_000.0)), Ok(()));
        assert_eq!(f.check(&trade(title, "fed-march", 0.949, 10_000.0)), Ok(()));
        assert_eq!(f.check(&trade(title, "fed-march", 0.5, 10_000.0)), Ok(()));
    }

    #[test]
    fn keywords_match_title_case_insensitively() {
        let f = filter();
        let r = f.check(&trade("Will BITCOIN reach $150k?", "btc-150k", 0.3, 20_000.0));
        let Err(Stage1Rejection::Keyword(idx)) = r else {
            panic!("expected keyword rejection, got {r:?}");
        };
        assert_eq!(f.keyword(idx), Some("bitcoin"));
    }

    #[test]
    fn keywords_match_slug() {
        let f = filter();
        let r = f.check(&trade("Lakers win tonight?", "nba-lal-bos-2025", 0.5, 20_000.0));
        assert!(matches!(r, Err(Stage1Rejection::Keyword(_))));
    }

    #[test]
    fn unrelated_market_passes() {
        let f = filter();
        let r = f.check(&trade(
            "Will the Supreme Court rule on tariffs by June?",
            "scotus-tariffs-june",
            0.62,
            12_500.0,
        ));
        assert_eq!(r, Ok(()));
    }

    #[test]
    fn political_titles_with_keyword_fragments_pass() {
        let f = filter();
        for (title, slug) in [
            ("Will Elizabeth Warren run for president in 2028?", "warren-2028"),
            ("Will Seth Moulton win the Senate primary?", "moulton-senate-primary"),
            ("Trump vs. Newsom: who wins 2028?", "trump-vs-newsom-2028"),
            ("Will the Senate ethics committee open an inquiry?", "senate-ethics-inquiry"),
        ] {
            assert_eq!(f.check(&trade(title, slug, 0.45, 20_000.0)), Ok(()), "{title}");
        }
    }

    #[test]
    fn short_keywords_still_match_as_words() {
        let f = filter();
        for (title, slug) in [
            ("ETH above $4k on Friday?", "eth-above-4k"),
            ("Who wins the F1 Monaco race?", "monaco-race"),
            ("Cryptocurrency market cap above $5T?", "market-cap-5t"),
        ] {
            assert!(
                matches!(f.check(&trade(title, slug, 0.45, 20_000.0)), Err(Stage1Rejection::Keyword(_))),
                "{title}"
            );
        }
    }

    #[test]
    fn contains_helper() {
        assert!(contains_word_ignore_ascii_case("Hello World", "world"));
        assert!(!contains_word_ignore_ascii_case("Hello", "hello world"));
        assert!(contains_word_ignore_ascii_case("abc", ""));
        assert!(contains_word_ignore_ascii_case("btc-updown-15m", "updown"));
        assert!(!contains_word_ignore_ascii_case("Kenneth", "eth"));
        assert!(contains_word_ignore_ascii_case("Bitcoin up or down?", "up or down"));
    }
}
