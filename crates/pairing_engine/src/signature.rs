//! Signature gate, complementary-leg rule and pair id hashing.

use market_normalizer::types::{Category, MarketType, NormalizedMarket, Selection};
use sha2::{Digest, Sha256};

pub const LINE_TOLERANCE: f64 = 0.05;
pub const ODDS_MIN: f64 = 1.01;
pub const ODDS_MAX: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PairRejectReason {
    #[error("missing event id")]
    MissingEvent,
    #[error("missing market")]
    MissingMarket,
    #[error("selection does not belong to the market family")]
    MissingSide,
    #[error("missing or unparseable line")]
    MissingLine,
    #[error("odds {0} outside the tradeable band")]
    LiquidityGuard(f64),
}

impl PairRejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            PairRejectReason::MissingEvent => "missing_event",
            PairRejectReason::MissingMarket => "missing_market",
            PairRejectReason::MissingSide => "missing_side",
            PairRejectReason::MissingLine => "missing_line",
            PairRejectReason::LiquidityGuard(_) => "LIQUIDITY_GUARD",
        }
    }
}

/// Gate applied before a quote is buffered.
pub fn check_signature(m: &NormalizedMarket) -> Result<(), PairRejectReason> {
    if m.event_id.trim().is_empty() {
        return Err(PairRejectReason::MissingEvent);
    }
    if m.key.trim().is_empty() {
        return Err(PairRejectReason::MissingMarket);
    }
    if m.selection.category() != m.market_type.category() {
        return Err(PairRejectReason::MissingSide);
    }
    if !m.line.is_finite() {
        return Err(PairRejectReason::MissingLine);
    }
    Ok(())
}

pub fn liquidity_guard(odds: f64) -> Result<(), PairRejectReason> {
    if (ODDS_MIN..=ODDS_MAX).contains(&odds) {
        Ok(())
    } else {
        Err(PairRejectReason::LiquidityGuard(odds))
    }
}

/// HDP: opposite sides, lines sum to zero. OU: opposite sides, equal lines.
pub fn complementary(a: &NormalizedMarket, b: &NormalizedMarket, tolerance: f64) -> bool {
    if a.market_type != b.market_type || a.selection.opposite() != b.selection {
        return false;
    }
    match a.market_type.category() {
        Category::Handicap => (a.line + b.line).abs() <= tolerance + 1e-9,
        Category::OverUnder => (a.line - b.line).abs() <= tolerance + 1e-9,
    }
}

/// Deterministic id of a logical matchup; provider A's selection goes first.
pub fn pair_id(event_id: &str, market_type: MarketType, line: f64, sel_a: Selection, sel_b: Selection) -> String {
    let abs_line = (line.abs() * 100.0).round() / 100.0;
    let signature = format!("{event_id}|{market_type}|{abs_line:.2}|{}|{}", sel_a.as_str(), sel_b.as_str());
    hash16(&signature)
}

/// Id of a one-sided display record.
pub fn force_disp_id(m: &NormalizedMarket) -> String {
    hash16(&format!("FORCE|{}|{}|{}", m.key, m.selection.as_str(), m.provider))
}

fn hash16(s: &str) -> String {
    let digest = Sha256::digest(s.as_bytes());
    let mut hex = format!("{digest:x}");
    hex.truncate(16);
    hex
}
