//! Handicap / total line parsing.
//!
//! Accepted shapes: `0`, `LEVEL`, `PK`, split lines `0/0.5` and `0.5-1`,
//! and plain signed decimals.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn dash_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([+-]?\d+(?:\.\d+)?)\s*-\s*([+-]?\d+(?:\.\d+)?)$").expect("dash line regex")
    })
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

fn parse_signed(s: &str) -> Option<f64> {
    let s = s.trim();
    let s = s.strip_prefix('+').unwrap_or(s);
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse one line token. `None` when the token is not a line.
pub fn extract_line(token: &str) -> Option<f64> {
    let t = token.trim().to_ascii_uppercase();
    if t.is_empty() {
        return None;
    }
    if matches!(t.as_str(), "0" | "LEVEL" | "PK" | "P K" | "P.K.") {
        return Some(0.0);
    }

    if let Some((a, b)) = t.split_once('/') {
        let (a, b) = (parse_signed(a)?, parse_signed(b)?);
        return Some(round4((a + b) / 2.0));
    }

    if let Some(caps) = dash_re().captures(&t) {
        let first_raw = caps.get(1)?.as_str();
        let a = parse_signed(first_raw)?;
        let mut b = parse_signed(caps.get(2)?.as_str())?;
        // Heuristic: "-0.5-1" means -0.5 and -1, the second operand's sign is
        // implied by the first.
        if first_raw.starts_with('-') && b > 0.0 {
            b = -b;
        }
        return Some(round4((a + b) / 2.0));
    }

    parse_signed(&t).map(round4)
}

pub fn line_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()).map(round4),
        Value::String(s) => extract_line(s),
        _ => None,
    }
}

/// First candidate that parses wins.
pub fn first_line<'a>(candidates: impl IntoIterator<Item = &'a Value>) -> Option<f64> {
    candidates.into_iter().find_map(line_from_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn level_and_zero() {
        assert_eq!(extract_line("LEVEL"), Some(0.0));
        assert_eq!(extract_line("pk"), Some(0.0));
        assert_eq!(extract_line("0"), Some(0.0));
        assert_eq!(extract_line("0.0"), Some(0.0));
    }

    #[test]
    fn slash_lines_average() {
        assert_eq!(extract_line("0/0.5"), Some(0.25));
        assert_eq!(extract_line("2.5/3"), Some(2.75));
        assert_eq!(extract_line("-0.5/-1"), Some(-0.75));
    }

    #[test]
    fn dash_lines_inherit_leading_sign() {
        assert_eq!(extract_line("-0.5-1"), Some(-0.75));
        assert_eq!(extract_line("0.5-1"), Some(0.75));
        assert_eq!(extract_line("-1 - 1.5"), Some(-1.25));
    }

    #[test]
    fn plain_and_garbage() {
        assert_eq!(extract_line("+1.25"), Some(1.25));
        assert_eq!(extract_line("-2"), Some(-2.0));
        assert_eq!(extract_line("abc"), None);
        assert_eq!(extract_line(""), None);
        assert_eq!(extract_line("1/x"), None);
    }

    #[test]
    fn first_parsable_candidate_wins() {
        let vals = [json!("n/a"), json!(-0.5), json!("1")];
        assert_eq!(first_line(vals.iter()), Some(-0.5));
        assert_eq!(first_line([json!(null)].iter()), None);
    }
}
