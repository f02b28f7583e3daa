//! Raw selection token → Home/Away or Over/Under.

use crate::team_names::mentions_team;
use crate::types::{Category, Selection};

fn keyword(token: &str, category: Category) -> Option<Selection> {
    let t = token.trim().to_ascii_uppercase();
    let first = t.split(|c: char| !c.is_ascii_alphanumeric()).next().unwrap_or("");
    match category {
        Category::Handicap => match first {
            "HOME" | "HOMETEAM" => Some(Selection::Home),
            "AWAY" | "AWAYTEAM" => Some(Selection::Away),
            _ => None,
        },
        Category::OverUnder => match first {
            "OVER" | "O" | "OV" => Some(Selection::Over),
            "UNDER" | "U" | "UN" => Some(Selection::Under),
            _ => None,
        },
    }
}

fn by_team_name(token: &str, home: &str, away: &str) -> Option<Selection> {
    let h = !home.is_empty() && mentions_team(token, home);
    let a = !away.is_empty() && mentions_team(token, away);
    match (h, a) {
        (true, false) => Some(Selection::Home),
        (false, true) => Some(Selection::Away),
        _ => None,
    }
}

fn short_token(token: &str) -> Option<Selection> {
    match token.trim().to_ascii_uppercase().as_str() {
        "1" | "H" => Some(Selection::Home),
        "2" | "A" => Some(Selection::Away),
        _ => None,
    }
}

/// Keyword first, then team-name match, then the `1`/`H`/`2`/`A` fallback.
/// Team names and short tokens only ever resolve handicap sides.
pub fn normalize_selection(token: &str, category: Category, home: &str, away: &str) -> Option<Selection> {
    if let Some(sel) = keyword(token, category) {
        return Some(sel);
    }
    if category == Category::OverUnder {
        return None;
    }
    by_team_name(token, home, away).or_else(|| short_token(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords() {
        assert_eq!(normalize_selection("home", Category::Handicap, "", ""), Some(Selection::Home));
        assert_eq!(normalize_selection("Away -0.5", Category::Handicap, "", ""), Some(Selection::Away));
        assert_eq!(normalize_selection("Over 2.5", Category::OverUnder, "", ""), Some(Selection::Over));
        assert_eq!(normalize_selection("u", Category::OverUnder, "", ""), Some(Selection::Under));
    }

    #[test]
    fn team_names_resolve_sides() {
        let sel = normalize_selection("Real Madrid", Category::Handicap, "Real Madrid CF", "Getafe");
        assert_eq!(sel, Some(Selection::Home));
        let sel = normalize_selection("Getafe +0.5", Category::Handicap, "Real Madrid", "Getafe");
        assert_eq!(sel, Some(Selection::Away));
    }

    #[test]
    fn short_token_fallback() {
        assert_eq!(normalize_selection("1", Category::Handicap, "X", "Y"), Some(Selection::Home));
        assert_eq!(normalize_selection("a", Category::Handicap, "X", "Y"), Some(Selection::Away));
        assert_eq!(normalize_selection("1", Category::OverUnder, "X", "Y"), None);
    }

    #[test]
    fn category_mismatch_is_none() {
        assert_eq!(normalize_selection("Over", Category::Handicap, "", ""), None);
        assert_eq!(normalize_selection("Home", Category::OverUnder, "", ""), None);
        assert_eq!(normalize_selection("draw", Category::Handicap, "X", "Y"), None);
    }
}
