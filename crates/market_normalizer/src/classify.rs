//! Raw market-type token → canonical market type.

use crate::types::{Category, MarketType, Period};

/// Markets we never price: corners, bookings, cards.
const DENY: &[&str] = &["CORNER", "BOOKING", "CARD"];

fn clean(token: &str) -> String {
    token
        .trim()
        .to_ascii_uppercase()
        .replace(['_', '-', '.', '(', ')'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn is_denied(token: &str) -> bool {
    let t = clean(token);
    DENY.iter().any(|d| t.contains(d))
}

fn numeric_code(t: &str) -> Option<MarketType> {
    match t {
        "1" => Some(MarketType::FtHdp),
        "3" => Some(MarketType::FtOu),
        "7" => Some(MarketType::HtHdp),
        "8" => Some(MarketType::HtOu),
        _ => None,
    }
}

fn period_of(t: &str, words: &[&str]) -> Period {
    let half_word = words
        .iter()
        .any(|w| matches!(*w, "HT" | "1H" | "FH" | "1ST" | "HALF" | "HALFTIME"));
    if half_word || t.contains("FIRST HALF") {
        Period::HalfTime
    } else {
        Period::FullTime
    }
}

fn category_of(t: &str, words: &[&str]) -> Option<Category> {
    let hdp = words
        .iter()
        .any(|w| matches!(*w, "HDP" | "AH" | "HANDICAP" | "ASIAN" | "SPREAD"));
    let ou = t.contains("O/U")
        || t.contains("OVER/UNDER")
        || words
            .iter()
            .any(|w| matches!(*w, "OU" | "OVER" | "UNDER" | "TOTAL" | "TOTALS" | "GOALS"));
    match (hdp, ou) {
        (true, false) => Some(Category::Handicap),
        (false, true) => Some(Category::OverUnder),
        _ => None,
    }
}

/// Classify a raw market token (numeric code, canonical name, or synonym).
/// Deny-listed and unknown tokens give `None`.
pub fn classify(token: &str) -> Option<MarketType> {
    let t = clean(token);
    if t.is_empty() || is_denied(&t) {
        return None;
    }
    if let Some(mt) = numeric_code(&t) {
        return Some(mt);
    }
    let words: Vec<&str> = t.split(' ').collect();
    let category = category_of(&t, &words)?;
    Some(MarketType::from_parts(period_of(&t, &words), category))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_codes() {
        assert_eq!(classify("1"), Some(MarketType::FtHdp));
        assert_eq!(classify("3"), Some(MarketType::FtOu));
        assert_eq!(classify("7"), Some(MarketType::HtHdp));
        assert_eq!(classify("8"), Some(MarketType::HtOu));
        assert_eq!(classify("2"), None);
    }

    #[test]
    fn names_and_synonyms() {
        assert_eq!(classify("OU"), Some(MarketType::FtOu));
        assert_eq!(classify("FT_HDP"), Some(MarketType::FtHdp));
        assert_eq!(classify("ht_ou"), Some(MarketType::HtOu));
        assert_eq!(classify("Asian Handicap"), Some(MarketType::FtHdp));
        assert_eq!(classify("1st Half Asian Handicap"), Some(MarketType::HtHdp));
        assert_eq!(classify("Over/Under"), Some(MarketType::FtOu));
        assert_eq!(classify("First Half O/U"), Some(MarketType::HtOu));
        assert_eq!(classify("Total Goals"), Some(MarketType::FtOu));
    }

    #[test]
    fn deny_list_and_unknowns() {
        assert_eq!(classify("CORNER KICKS"), None);
        assert_eq!(classify("Total Corners"), None);
        assert_eq!(classify("Bookings Handicap"), None);
        assert_eq!(classify("1X2"), None);
        assert_eq!(classify(""), None);
        assert!(is_denied("corner ou"));
        assert!(!is_denied("HDP"));
    }
}
