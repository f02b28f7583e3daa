//! Hong Kong odds → decimal odds.
//!
//! HK odds quote net profit per unit stake when non-negative (`0.95` pays
//! 0.95 on 1.00), and the stake needed to win one unit when negative
//! (`-1.21` risks 1.21 to win 1.00).

use serde_json::Value;

/// Anything below this is not a bettable price.
pub const ODDS_FLOOR: f64 = 1.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OddsError {
    #[error("INVALID_ODDS")]
    Invalid,
    #[error("ODDS_TOO_LOW")]
    TooLow,
}

impl OddsError {
    pub fn code(&self) -> &'static str {
        match self {
            OddsError::Invalid => "INVALID_ODDS",
            OddsError::TooLow => "ODDS_TOO_LOW",
        }
    }
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

/// Convert HK odds, telling apart garbage input from a sub-floor price.
pub fn convert(raw: f64) -> Result<f64, OddsError> {
    if !raw.is_finite() || raw == 0.0 {
        return Err(OddsError::Invalid);
    }
    let decimal = if raw > 0.0 { raw + 1.0 } else { 1.0 + 1.0 / raw.abs() };
    let decimal = round4(decimal);
    if decimal < ODDS_FLOOR {
        return Err(OddsError::TooLow);
    }
    Ok(decimal)
}

pub fn to_decimal(raw: f64) -> Option<f64> {
    convert(raw).ok()
}

pub fn to_decimal_str(raw: &str) -> Option<f64> {
    parse_odds_str(raw).and_then(to_decimal)
}

fn parse_odds_str(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().replace(',', ".");
    let cleaned = cleaned.strip_prefix('+').unwrap_or(&cleaned);
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Numeric odds from a JSON number or numeric string. Objects such as
/// `{"odds": 0.95}` / `{"price": 0.95}` are unwrapped one level.
pub fn parse_raw_odds(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_odds_str(s),
        Value::Object(map) => ["odds", "Odds", "price", "Price", "value", "Value"]
            .iter()
            .find_map(|k| map.get(*k))
            .and_then(|inner| match inner {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => parse_odds_str(s),
                _ => None,
            }),
        _ => None,
    }
}
