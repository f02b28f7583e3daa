//! Per-provider field alias tables.
//!
//! Each canonical field maps to an ordered list of raw keys. Lookups take the
//! first key that is present and non-empty.

use crate::types::Provider;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    EventId,
    PreResolvedEventId,
    Bookmaker,
    League,
    MarketType,
    MarketName,
    Home,
    Away,
    Selection,
    SelectionId,
    Line,
    Odds,
    Score,
    Account,
}

const COMMON: &[(Field, &[&str])] = &[
    (Field::EventId, &["matchId", "match_id", "eventId", "event_id", "MatchId", "EventId", "id", "Id"]),
    (Field::PreResolvedEventId, &["globalEventId", "global_event_id", "resolvedEventId"]),
    (Field::Bookmaker, &["bookmaker", "Bookmaker", "book", "site"]),
    (Field::League, &["league", "League", "leagueName", "competition"]),
    (Field::MarketType, &["marketType", "market_type", "MarketType", "betType", "BetType", "market", "Market", "type"]),
    (Field::MarketName, &["marketName", "market_name", "MarketName"]),
    (Field::Home, &["home", "homeTeam", "home_team", "HomeTeam", "HomeName", "team1"]),
    (Field::Away, &["away", "awayTeam", "away_team", "AwayTeam", "AwayName", "team2"]),
    (Field::Selection, &["selection", "side", "Selection", "Side", "pick", "outcome", "betTeam"]),
    (Field::SelectionId, &["selectionId", "selection_id", "SelectionId", "oddsId", "OddsId"]),
    (Field::Line, &["line", "hdp", "handicap", "Line", "Hdp", "Handicap", "goalLine", "ou", "total", "points"]),
    (Field::Odds, &["odds", "Odds", "price", "Price", "hkOdds"]),
    (Field::Score, &["score", "Score", "currentScore", "liveScore", "RunningScore"]),
    (Field::Account, &["account", "accountId", "Account", "login"]),
];

/// Keys only provider B's capture uses; consulted before the common list.
const PROVIDER_B_FIRST: &[(Field, &[&str])] = &[
    (Field::EventId, &["MatchNo", "GameId"]),
    (Field::MarketType, &["OddsType", "MarketCode"]),
    (Field::Line, &["HdpValue", "Goal"]),
    (Field::Home, &["HTeam"]),
    (Field::Away, &["ATeam"]),
];

/// Keys only provider A's capture uses.
const PROVIDER_A_FIRST: &[(Field, &[&str])] = &[
    (Field::EventId, &["fixtureId"]),
    (Field::Line, &["ballHandicap"]),
];

#[derive(Debug, Clone)]
pub struct AliasTable {
    entries: Vec<(Field, Vec<&'static str>)>,
}

impl AliasTable {
    pub fn for_provider(provider: Provider) -> Self {
        let first = match provider {
            Provider::A => PROVIDER_A_FIRST,
            Provider::B => PROVIDER_B_FIRST,
        };
        let entries = COMMON
            .iter()
            .map(|(field, keys)| {
                let mut all: Vec<&'static str> = first
                    .iter()
                    .filter(|(f, _)| f == field)
                    .flat_map(|(_, ks)| ks.iter().copied())
                    .collect();
                all.extend(keys.iter().copied());
                (*field, all)
            })
            .collect();
        Self { entries }
    }

    pub fn keys(&self, field: Field) -> &[&'static str] {
        self.entries
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, keys)| keys.as_slice())
            .unwrap_or(&[])
    }

    /// All present, non-empty values for `field`, in alias order.
    pub fn candidates<'a>(&self, field: Field, payload: &'a Value) -> Vec<&'a Value> {
        self.keys(field)
            .iter()
            .filter_map(|k| payload.get(*k))
            .filter(|v| !is_blank(v))
            .collect()
    }

    pub fn get<'a>(&self, field: Field, payload: &'a Value) -> Option<&'a Value> {
        self.keys(field)
            .iter()
            .filter_map(|k| payload.get(*k))
            .find(|v| !is_blank(v))
    }

    /// Scalar value rendered as a trimmed string.
    pub fn get_str(&self, field: Field, payload: &Value) -> Option<String> {
        self.candidates(field, payload).into_iter().find_map(scalar_string)
    }
}

fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

pub fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
