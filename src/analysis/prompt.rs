use std::collections::HashSet;
use std::fmt::Write as _;

use serde::Deserialize;
use serde_json::Value;

use crate::llm::extract_json_array;
use crate::types::{ConsensusPick, Direction, MarketDecision, MarketRecord};

pub const REASONING_SYSTEM: &str = "You are a prediction-market analyst. Large wallets have \
just traded the markets below. For each market decide whether the informed side is YES or NO, \
or SKIP if there is no edge. Reply with a JSON array only, one object per market: \
[{\"market_id\": string, \"decision\": \"YES\"|\"NO\"|\"SKIP\", \"confidence\": 0-100, \"reasoning\": string}]";

pub const CONSENSUS_SYSTEM: &str = "You review a batch of market calls and keep only the \
strongest ones. Re-rank the calls and return at most the requested number of picks as a JSON \
array only: [{\"market_id\": string, \"decision\": \"YES\"|\"NO\", \"rank\": 1.., \"rationale\": string}]";

/// Market list for the reasoning request. One block per market, most recent trade first.
pub fn build_batch_prompt(markets: &[MarketRecord]) -> String {
    let mut out = format!("{} markets with recent whale activity:\n\n", markets.len());
    for (i, m) in markets.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, m.title);
        let _ = writeln!(out, "   market_id: {}", m.market_id);
        let _ = writeln!(
            out,
            "   last whale trade: ${:.0} on {} @ {:.3}",
            m.size_usd, m.outcome, m.price
        );
        let _ = writeln!(out, "   link: {}", m.link());
        out.push('\n');
    }
    out
}

/// Follow-up request asking for the `top_picks` strongest calls out of `first_response`.
pub fn build_consensus_prompt(first_response: &str, top_picks: usize) -> String {
    format!(
        "Here are the market calls from the first pass:\n\n{first_response}\n\n\
         Return the top {top_picks} picks with the strongest agreement on direction."
    )
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    market_id: Option<String>,
    decision: Option<String>,
    confidence: Option<Value>,
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPick {
    market_id: Option<String>,
    decision: Option<String>,
    rank: Option<Value>,
    rationale: Option<String>,
}

/// Decisions for markets that were actually in the batch. Entries with unknown ids or an
/// unreadable decision are skipped; an unparseable reply yields an empty list.
pub fn parse_decisions(text: &str, batch: &[MarketRecord]) -> Vec<MarketDecision> {
    let known: HashSet<&str> = batch.iter().map(|m| m.market_id.as_str()).collect();
    let Some(raw) = parse_array::<RawDecision>(text) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    raw.into_iter()
        .filter_map(|r| {
            let market_id = r.market_id?;
            if !known.contains(market_id.as_str()) || !seen.insert(market_id.clone()) {
                return None;
            }
            Some(MarketDecision {
                decision: parse_direction(r.decision.as_deref()?)?,
                confidence: r.confidence.as_ref().and_then(Value::as_f64).unwrap_or(0.0).clamp(0.0, 100.0) as u8,
                reasoning: r.reasoning.unwrap_or_default(),
                market_id,
            })
        })
        .collect()
}

/// Consensus picks, ranked 1..=n and truncated to `top_picks`.
pub fn parse_consensus(text: &str, batch: &[MarketRecord], top_picks: usize) -> Vec<ConsensusPick> {
    let known: HashSet<&str> = batch.iter().map(|m| m.market_id.as_str()).collect();
    let Some(raw) = parse_array::<RawPick>(text) else {
        return Vec::new();
    };

    let mut picks: Vec<(u64, ConsensusPick)> = raw
        .into_iter()
        .enumerate()
        .filter_map(|(i, r)| {
            let market_id = r.market_id?;
            if !known.contains(market_id.as_str()) {
                return None;
            }
            let order = r.rank.as_ref().and_then(Value::as_u64).unwrap_or(i as u64 + 1);
            Some((
                order,
                ConsensusPick {
                    decision: parse_direction(r.decision.as_deref()?)?,
                    rank: 0,
                    rationale: r.rationale.unwrap_or_default(),
                    market_id,
                },
            ))
        })
        .collect();

    picks.sort_by_key(|(order, _)| *order);
    let mut seen = HashSet::new();
    picks
        .into_iter()
        .map(|(_, p)| p)
        .filter(|p| seen.insert(p.market_id.clone()))
        .take(top_picks)
        .enumerate()
        .map(|(i, mut p)| {
            p.rank = i as u32 + 1;
            p
        })
        .collect()
}

fn parse_array<T: for<'de> Deserialize<'de>>(text: &str) -> Option<Vec<T>> {
    let json = extract_json_array(text)?;
    let values: Vec<Value> = serde_json::from_str(json).ok()?;
    Some(
        values
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect(),
    )
}

fn parse_direction(s: &str) -> Option<Direction> {
    match s.trim().to_ascii_uppercase().as_str() {
        "YES" => Some(Direction::Yes),
        "NO" => Some(Direction::No),
        "SKIP" | "PASS" => Some(Direction::Skip),
        _ => None,
    }
}
