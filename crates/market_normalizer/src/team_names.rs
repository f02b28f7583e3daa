//! Team name canonicalization and fuzzy similarity.
//!
//! Shared by the identity resolver (clustering the two streams onto one
//! fixture) and by selection matching, where a provider names the team
//! instead of saying "Home"/"Away".

use std::collections::HashSet;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

/// Tokens that carry no identity ("FC Porto" vs "Porto").
const NOISE_TOKENS: &[&str] = &["fc", "cf", "sc", "afc", "club", "the", "cd", "ac"];

/// Squad qualifiers dropped before comparison.
const SUFFIX_TOKENS: &[&str] = &["w", "women", "u23", "u21", "u19", "reserves", "res"];

pub fn canonicalize(name: &str) -> String {
    let folded: String = name
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let tokens: Vec<&str> = folded
        .split_whitespace()
        .filter(|t| !NOISE_TOKENS.contains(t) && !SUFFIX_TOKENS.contains(t))
        .collect();

    if tokens.is_empty() {
        // "FC" alone or similar; keep whatever was there rather than an empty id.
        return folded.split_whitespace().collect::<Vec<_>>().join(" ");
    }
    tokens.join(" ")
}

fn bigrams(s: &str) -> Vec<(char, char)> {
    let chars: Vec<char> = s.chars().filter(|c| !c.is_whitespace()).collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

/// Sørensen–Dice coefficient over character bigrams.
fn dice(a: &str, b: &str) -> f64 {
    let ba = bigrams(a);
    let mut bb = bigrams(b);
    if ba.is_empty() || bb.is_empty() {
        return 0.0;
    }
    let total = ba.len() + bb.len();
    let mut hits = 0usize;
    for g in &ba {
        if let Some(pos) = bb.iter().position(|x| x == g) {
            bb.swap_remove(pos);
            hits += 1;
        }
    }
    (2 * hits) as f64 / total as f64
}

fn word_set(s: &str) -> HashSet<&str> {
    s.split_whitespace().collect()
}

/// Whole-word containment: every word of the shorter name appears in the longer.
fn contains_words(long: &str, short: &str) -> bool {
    let long_words = word_set(long);
    let short_words = word_set(short);
    !short_words.is_empty() && short_words.is_subset(&long_words)
}

/// Similarity in `[0, 1]` between two raw team names.
pub fn similarity(a: &str, b: &str) -> f64 {
    let ca = canonicalize(a);
    let cb = canonicalize(b);
    if ca.is_empty() || cb.is_empty() {
        return 0.0;
    }
    if ca == cb {
        return 1.0;
    }
    // "Rebeka Masarova" vs "Masarova Rebeka"
    let (wa, wb) = (word_set(&ca), word_set(&cb));
    if wa.len() >= 2 && wa == wb {
        return 1.0;
    }
    if contains_words(&ca, &cb) || contains_words(&cb, &ca) {
        return 0.9;
    }
    dice(&ca, &cb)
}

pub fn same_team(a: &str, b: &str, threshold: f64) -> bool {
    similarity(a, b) >= threshold
}

/// True when `haystack` (e.g. a selection label such as "Arsenal -0.5")
/// mentions `team` as whole words after canonicalization.
pub fn mentions_team(haystack: &str, team: &str) -> bool {
    let h = canonicalize(haystack);
    let t = canonicalize(team);
    if h.is_empty() || t.is_empty() {
        return false;
    }
    h == t || contains_words(&h, &t)
}
