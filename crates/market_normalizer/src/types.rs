//! Canonical market records shared by the normalizer, the pairing engine and
//! the arbitrage decider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the two bookmaker sessions feeding the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    A,
    B,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::A => "A",
            Provider::B => "B",
        }
    }

    pub fn opposite(&self) -> Provider {
        match self {
            Provider::A => Provider::B,
            Provider::B => Provider::A,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" | "PROVIDER_A" => Ok(Provider::A),
            "B" | "PROVIDER_B" => Ok(Provider::B),
            other => Err(format!("unknown provider '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "FT")]
    FullTime,
    #[serde(rename = "HT")]
    HalfTime,
}

/// Market family: Asian handicap or over/under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "HDP")]
    Handicap,
    #[serde(rename = "OU")]
    OverUnder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketType {
    #[serde(rename = "FT_HDP")]
    FtHdp,
    #[serde(rename = "HT_HDP")]
    HtHdp,
    #[serde(rename = "FT_OU")]
    FtOu,
    #[serde(rename = "HT_OU")]
    HtOu,
}

impl MarketType {
    pub fn from_parts(period: Period, category: Category) -> Self {
        match (period, category) {
            (Period::FullTime, Category::Handicap) => MarketType::FtHdp,
            (Period::HalfTime, Category::Handicap) => MarketType::HtHdp,
            (Period::FullTime, Category::OverUnder) => MarketType::FtOu,
            (Period::HalfTime, Category::OverUnder) => MarketType::HtOu,
        }
    }

    pub fn period(&self) -> Period {
        match self {
            MarketType::FtHdp | MarketType::FtOu => Period::FullTime,
            MarketType::HtHdp | MarketType::HtOu => Period::HalfTime,
        }
    }

    pub fn category(&self) -> Category {
        match self {
            MarketType::FtHdp | MarketType::HtHdp => Category::Handicap,
            MarketType::FtOu | MarketType::HtOu => Category::OverUnder,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketType::FtHdp => "FT_HDP",
            MarketType::HtHdp => "HT_HDP",
            MarketType::FtOu => "FT_OU",
            MarketType::HtOu => "HT_OU",
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Selection {
    Home,
    Away,
    Over,
    Under,
}

impl Selection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Selection::Home => "Home",
            Selection::Away => "Away",
            Selection::Over => "Over",
            Selection::Under => "Under",
        }
    }

    pub fn category(&self) -> Category {
        match self {
            Selection::Home | Selection::Away => Category::Handicap,
            Selection::Over | Selection::Under => Category::OverUnder,
        }
    }

    pub fn opposite(&self) -> Selection {
        match self {
            Selection::Home => Selection::Away,
            Selection::Away => Selection::Home,
            Selection::Over => Selection::Under,
            Selection::Under => Selection::Over,
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scraped quote as it arrives from a provider session. The payload keeps the
/// provider's own key names; `aliases` knows how to read them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawQuote {
    pub provider:    Provider,
    pub received_at: DateTime<Utc>,
    pub payload:     serde_json::Value,
}

impl RawQuote {
    pub fn new(provider: Provider, payload: serde_json::Value) -> Self {
        Self { provider, received_at: Utc::now(), payload }
    }
}

/// Canonical, immutable market leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMarket {
    /// `eventId|type|line`
    pub key:             String,
    pub event_id:        String,
    pub market_type:     MarketType,
    pub period:          Period,
    pub line:            f64,
    pub selection:       Selection,
    /// Decimal odds, always >= 1.01.
    pub odds:            f64,
    /// Regional (HK) odds as received.
    pub raw_odds:        f64,
    pub market_name_raw: String,
    pub selection_id:    Option<String>,
    pub provider:        Provider,
    pub bookmaker:       String,
    pub league:          String,
    pub home:            String,
    pub away:            String,
    /// Current game score as reported by this book, if any.
    pub score:           Option<String>,
    pub account:         Option<String>,
    pub received_at:     DateTime<Utc>,
}

impl NormalizedMarket {
    pub fn market_key(event_id: &str, market_type: MarketType, line: f64) -> String {
        format!("{}|{}|{}", event_id, market_type.as_str(), fmt_line(line))
    }

    /// Same `(type, line, selection)` slot, used for latest-quote-wins replacement.
    pub fn same_slot(&self, other: &NormalizedMarket) -> bool {
        self.market_type == other.market_type
            && self.selection == other.selection
            && (self.line - other.line).abs() < 1e-6
    }
}

/// Render a line without float noise: `-0.75`, `2.5`, `0`.
pub fn fmt_line(line: f64) -> String {
    let s = format!("{:.2}", line);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    match s {
        "-0" | "" => "0".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fmt_line_trims_noise() {
        assert_eq!(fmt_line(-0.75), "-0.75");
        assert_eq!(fmt_line(2.5), "2.5");
        assert_eq!(fmt_line(0.0), "0");
        assert_eq!(fmt_line(-0.0), "0");
        assert_eq!(fmt_line(0.25000000001), "0.25");
        assert_eq!(fmt_line(3.0), "3");
    }

    #[test]
    fn market_type_round_trips_parts() {
        for mt in [MarketType::FtHdp, MarketType::HtHdp, MarketType::FtOu, MarketType::HtOu] {
            assert_eq!(MarketType::from_parts(mt.period(), mt.category()), mt);
        }
        assert_eq!(serde_json::to_string(&MarketType::HtOu).unwrap(), "\"HT_OU\"");
    }

    #[test]
    fn provider_parses_loosely() {
        assert_eq!("a".parse::<Provider>().unwrap(), Provider::A);
        assert_eq!(" B ".parse::<Provider>().unwrap(), Provider::B);
        assert!("C".parse::<Provider>().is_err());
        assert_eq!(Provider::A.opposite(), Provider::B);
    }

    #[test]
    fn market_key_uses_canonical_line() {
        assert_eq!(NormalizedMarket::market_key("E1", MarketType::FtHdp, -0.5), "E1|FT_HDP|-0.5");
    }
}
