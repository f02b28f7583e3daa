/// Dual-feed arb: Market Normalizer
///
/// Raw scraped payload → zero or more canonical market legs.
/// Every failure is a tagged, non-fatal rejection.

pub mod aliases;
pub mod classify;
pub mod identity;
pub mod line;
pub mod odds;
pub mod selection;
pub mod team_names;
pub mod types;

use aliases::{scalar_string, AliasTable, Field};
use chrono::{DateTime, Utc};
use identity::{IdentityQuery, IdentityResolver};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use types::{MarketType, NormalizedMarket, Provider, RawQuote, Selection};

pub use classify::classify;
pub use line::extract_line;
pub use odds::{to_decimal, OddsError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("EMPTY_IDENTITY")]
    EmptyIdentity,
    #[error("NOT_SUPPORTED_TYPE")]
    NotSupportedType,
    #[error("INVALID_LINE")]
    InvalidLine,
    #[error("INVALID_SELECTION")]
    InvalidSelection,
    #[error("INVALID_ODDS")]
    InvalidOdds,
    #[error("ODDS_TOO_LOW")]
    OddsTooLow,
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::EmptyIdentity => "EMPTY_IDENTITY",
            RejectReason::NotSupportedType => "NOT_SUPPORTED_TYPE",
            RejectReason::InvalidLine => "INVALID_LINE",
            RejectReason::InvalidSelection => "INVALID_SELECTION",
            RejectReason::InvalidOdds => "INVALID_ODDS",
            RejectReason::OddsTooLow => "ODDS_TOO_LOW",
        }
    }
}

impl From<OddsError> for RejectReason {
    fn from(e: OddsError) -> Self {
        match e {
            OddsError::Invalid => RejectReason::InvalidOdds,
            OddsError::TooLow => RejectReason::OddsTooLow,
        }
    }
}

/// Enough context to audit a false negative.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub reason:    RejectReason,
    pub provider:  Provider,
    pub event_id:  String,
    pub market:    String,
    pub raw_value: String,
}

#[derive(Debug, Default)]
pub struct NormalizeOutcome {
    pub markets:    Vec<NormalizedMarket>,
    pub rejections: Vec<Rejection>,
}

impl NormalizeOutcome {
    fn rejected(r: Rejection) -> Self {
        Self { markets: Vec::new(), rejections: vec![r] }
    }
}

/// Everything about the quote that does not depend on the market.
struct QuoteContext<'a> {
    provider:  Provider,
    aliases:   &'a AliasTable,
    event_ids: Vec<String>,
    bookmaker: String,
    league:    String,
    home:      String,
    away:      String,
    score:     Option<String>,
    account:   Option<String>,
    quote:     &'a RawQuote,
}

impl QuoteContext<'_> {
    fn reject(&self, reason: RejectReason, market: &str, raw_value: impl Into<String>) -> Rejection {
        Rejection {
            reason,
            provider: self.provider,
            event_id: self.event_ids.first().cloned().unwrap_or_default(),
            market: market.to_string(),
            raw_value: raw_value.into(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit(
        &self,
        market_type: MarketType,
        line: f64,
        selection: Selection,
        odds: f64,
        raw_odds: f64,
        market_name_raw: &str,
        selection_id: Option<String>,
    ) -> Vec<NormalizedMarket> {
        self.event_ids
            .iter()
            .map(|event_id| NormalizedMarket {
                key: NormalizedMarket::market_key(event_id, market_type, line),
                event_id: event_id.clone(),
                market_type,
                period: market_type.period(),
                line,
                selection,
                odds,
                raw_odds,
                market_name_raw: market_name_raw.to_string(),
                selection_id: selection_id.clone(),
                provider: self.provider,
                bookmaker: self.bookmaker.clone(),
                league: self.league.clone(),
                home: self.home.clone(),
                away: self.away.clone(),
                score: self.score.clone(),
                account: self.account.clone(),
                received_at: self.quote.received_at,
            })
            .collect()
    }
}

/// Raw ids that carry no identity: bare floats, "0", very short tokens.
fn looks_synthetic(raw: &Value) -> bool {
    match raw {
        Value::Number(n) => n.as_i64().map_or(true, |i| i == 0),
        Value::String(s) => {
            let s = s.trim();
            s == "0" || s.chars().count() < 3 || (s.contains('.') && s.parse::<f64>().is_ok())
        }
        _ => true,
    }
}

fn synthetic_raw_id(home: &str, away: &str) -> Option<String> {
    let h = team_names::canonicalize(home);
    let a = team_names::canonicalize(away);
    if h.is_empty() || a.is_empty() {
        return None;
    }
    Some(format!("syn_{}_vs_{}", h.replace(' ', "_"), a.replace(' ', "_")))
}

pub struct MarketNormalizer {
    resolver: Arc<dyn IdentityResolver>,
    aliases_a: AliasTable,
    aliases_b: AliasTable,
}

impl MarketNormalizer {
    pub fn new(resolver: Arc<dyn IdentityResolver>) -> Self {
        Self {
            resolver,
            aliases_a: AliasTable::for_provider(Provider::A),
            aliases_b: AliasTable::for_provider(Provider::B),
        }
    }

    /// Let the resolver drop identities idle since `cutoff`.
    pub fn purge_identities(&self, cutoff: DateTime<Utc>) -> usize {
        let removed = self.resolver.purge_older_than(cutoff);
        if removed > 0 {
            debug!(removed, "idle identities purged");
        }
        removed
    }

    fn aliases(&self, provider: Provider) -> &AliasTable {
        match provider {
            Provider::A => &self.aliases_a,
            Provider::B => &self.aliases_b,
        }
    }

    pub fn normalize(&self, quote: &RawQuote) -> NormalizeOutcome {
        let provider = quote.provider;
        let aliases = self.aliases(provider);
        let payload = &quote.payload;

        let home = aliases.get_str(Field::Home, payload).unwrap_or_default();
        let away = aliases.get_str(Field::Away, payload).unwrap_or_default();

        let mut ctx = QuoteContext {
            provider,
            aliases,
            event_ids: Vec::new(),
            bookmaker: aliases.get_str(Field::Bookmaker, payload).unwrap_or_default(),
            league: aliases.get_str(Field::League, payload).unwrap_or_default(),
            home,
            away,
            score: aliases.get_str(Field::Score, payload),
            account: aliases.get_str(Field::Account, payload),
            quote,
        };

        // 1. identity
        match self.resolve_identity(&ctx) {
            Ok(ids) => ctx.event_ids = ids,
            Err(raw) => {
                return NormalizeOutcome::rejected(ctx.reject(RejectReason::EmptyIdentity, "", raw));
            }
        }

        // 2. classification
        let token = aliases.get_str(Field::MarketType, payload).unwrap_or_default();
        if !token.is_empty() && classify::is_denied(&token) {
            return NormalizeOutcome::rejected(ctx.reject(RejectReason::NotSupportedType, &token, token.clone()));
        }

        if let Some(market_type) = classify::classify(&token) {
            return match build_leg(&ctx, market_type, payload, &token) {
                Ok(markets) => NormalizeOutcome { markets, rejections: Vec::new() },
                Err(r) => NormalizeOutcome::rejected(r),
            };
        }

        if let Some(subs) = markets_array(payload) {
            return normalize_sub_markets(&ctx, subs);
        }

        if let Some(odds) = bare_odds_array(aliases, payload) {
            return synthetic_pair(&ctx, odds, payload);
        }

        NormalizeOutcome::rejected(ctx.reject(RejectReason::NotSupportedType, &token, token.clone()))
    }

    /// Global ids for this quote, or the raw id that failed.
    fn resolve_identity(&self, ctx: &QuoteContext<'_>) -> Result<Vec<String>, String> {
        let payload = &ctx.quote.payload;
        if let Some(pre) = ctx.aliases.get_str(Field::PreResolvedEventId, payload) {
            return Ok(vec![pre]);
        }

        let raw_id = match ctx.aliases.get(Field::EventId, payload) {
            Some(v) if !looks_synthetic(v) => scalar_string(v),
            _ => synthetic_raw_id(&ctx.home, &ctx.away),
        }
        .ok_or_else(String::new)?;

        let query = IdentityQuery {
            provider: ctx.provider,
            raw_id: raw_id.clone(),
            home: ctx.home.clone(),
            away: ctx.away.clone(),
        };
        match self.resolver.resolve_global_event_id(&query) {
            Ok(ids) if !ids.is_empty() => Ok(ids),
            Ok(_) => Err(raw_id),
            Err(e) => {
                debug!(provider = %ctx.provider, raw_id = %raw_id, "identity resolution failed: {e}");
                Err(raw_id)
            }
        }
    }
}

/// Line → selection → odds for one market object.
fn build_leg(
    ctx: &QuoteContext<'_>,
    market_type: MarketType,
    market: &Value,
    token: &str,
) -> Result<Vec<NormalizedMarket>, Rejection> {
    let aliases = ctx.aliases;
    let market_name = aliases
        .get_str(Field::MarketName, market)
        .unwrap_or_else(|| token.to_string());

    // 3. line
    let line = line::first_line(aliases.candidates(Field::Line, market)).ok_or_else(|| {
        let raw = aliases.get_str(Field::Line, market).unwrap_or_default();
        ctx.reject(RejectReason::InvalidLine, &market_name, raw)
    })?;

    // 4. selection
    let raw_sel = aliases.get_str(Field::Selection, market).unwrap_or_default();
    let selection = selection::normalize_selection(&raw_sel, market_type.category(), &ctx.home, &ctx.away)
        .ok_or_else(|| ctx.reject(RejectReason::InvalidSelection, &market_name, raw_sel.clone()))?;

    // 5. odds
    let raw_odds_value = aliases.get(Field::Odds, market);
    let raw_odds = raw_odds_value.and_then(odds::parse_raw_odds).ok_or_else(|| {
        let raw = raw_odds_value.map(|v| v.to_string()).unwrap_or_default();
        ctx.reject(RejectReason::InvalidOdds, &market_name, raw)
    })?;
    let decimal = odds::convert(raw_odds)
        .map_err(|e| ctx.reject(e.into(), &market_name, raw_odds.to_string()))?;

    let selection_id = aliases.get_str(Field::SelectionId, market);

    // 6. one record per resolved event id
    Ok(ctx.emit(market_type, line, selection, decimal, raw_odds, &market_name, selection_id))
}

fn markets_array(payload: &Value) -> Option<&Vec<Value>> {
    ["Markets", "markets"]
        .iter()
        .find_map(|k| payload.get(*k))
        .and_then(Value::as_array)
        .filter(|a| !a.is_empty())
}

fn normalize_sub_markets(ctx: &QuoteContext<'_>, subs: &[Value]) -> NormalizeOutcome {
    let mut out = NormalizeOutcome::default();
    for sub in subs {
        let token = ctx.aliases.get_str(Field::MarketType, sub).unwrap_or_default();
        if classify::is_denied(&token) {
            out.rejections.push(ctx.reject(RejectReason::NotSupportedType, &token, token.clone()));
            continue;
        }
        let Some(market_type) = classify::classify(&token) else {
            out.rejections.push(ctx.reject(RejectReason::NotSupportedType, &token, token.clone()));
            continue;
        };
        match build_leg(ctx, market_type, sub, &token) {
            Ok(mut legs) => out.markets.append(&mut legs),
            Err(r) => out.rejections.push(r),
        }
    }
    out
}

/// `odds: [h, .., a]` with no market label and no selection field.
fn bare_odds_array<'a>(aliases: &AliasTable, payload: &'a Value) -> Option<&'a Vec<Value>> {
    if aliases.get(Field::Selection, payload).is_some() {
        return None;
    }
    ["odds", "Odds"]
        .iter()
        .find_map(|k| payload.get(*k))
        .and_then(Value::as_array)
        .filter(|a| a.len() >= 2)
        .filter(|a| a.iter().all(|v| v.is_number() || v.is_object() || v.is_string()))
}

/// Permissive fallback: first entry is Home, last is Away, FT handicap.
fn synthetic_pair(ctx: &QuoteContext<'_>, odds_arr: &[Value], payload: &Value) -> NormalizeOutcome {
    const SYNTHETIC: &str = "SYNTHETIC_FT_HDP";
    let line = line::first_line(ctx.aliases.candidates(Field::Line, payload)).unwrap_or(0.0);
    let mut out = NormalizeOutcome::default();

    let ends = [(odds_arr.first(), Selection::Home, line), (odds_arr.last(), Selection::Away, -line)];
    for (value, selection, leg_line) in ends {
        let Some(raw) = value.and_then(odds::parse_raw_odds) else {
            let raw = value.map(|v| v.to_string()).unwrap_or_default();
            out.rejections.push(ctx.reject(RejectReason::InvalidOdds, SYNTHETIC, raw));
            continue;
        };
        match odds::convert(raw) {
            Ok(decimal) => {
                let leg_line = if leg_line == 0.0 { 0.0 } else { leg_line };
                out.markets
                    .extend(ctx.emit(MarketType::FtHdp, leg_line, selection, decimal, raw, SYNTHETIC, None));
            }
            Err(e) => out.rejections.push(ctx.reject(e.into(), SYNTHETIC, raw.to_string())),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use identity::IdentityError;
    use serde_json::json;

    struct Fixed(Vec<&'static str>);

    impl IdentityResolver for Fixed {
        fn resolve_global_event_id(&self, _q: &IdentityQuery) -> Result<Vec<String>, IdentityError> {
            Ok(self.0.iter().map(|s| s.to_string()).collect())
        }
    }

    struct Failing;

    impl IdentityResolver for Failing {
        fn resolve_global_event_id(&self, q: &IdentityQuery) -> Result<Vec<String>, IdentityError> {
            Err(IdentityError::Unresolvable { provider: q.provider, raw_id: q.raw_id.clone() })
        }
    }

    fn normalizer(ids: Vec<&'static str>) -> MarketNormalizer {
        MarketNormalizer::new(Arc::new(Fixed(ids)))
    }

    fn quote(provider: Provider, payload: Value) -> RawQuote {
        RawQuote::new(provider, payload)
    }

    fn base() -> Value {
        json!({
            "matchId": "88123",
            "bookmaker": "bookA",
            "league": "EPL",
            "home": "Arsenal",
            "away": "Chelsea",
            "marketType": "1",
            "line": "-0.5",
            "selection": "Home",
            "odds": 0.95
        })
    }

    #[test]
    fn happy_path_builds_canonical_leg() {
        let out = normalizer(vec!["E1"]).normalize(&quote(Provider::A, base()));
        assert!(out.rejections.is_empty(), "{:?}", out.rejections);
        assert_eq!(out.markets.len(), 1);
        let m = &out.markets[0];
        assert_eq!(m.key, "E1|FT_HDP|-0.5");
        assert_eq!(m.market_type, MarketType::FtHdp);
        assert_eq!(m.selection, Selection::Home);
        assert_eq!(m.odds, 1.95);
        assert_eq!(m.raw_odds, 0.95);
        assert_eq!(m.bookmaker, "bookA");
        assert_eq!(m.provider, Provider::A);
    }

    #[test]
    fn ambiguous_identity_fans_out() {
        let out = normalizer(vec!["E1", "E2"]).normalize(&quote(Provider::A, base()));
        let ids: Vec<&str> = out.markets.iter().map(|m| m.event_id.as_str()).collect();
        assert_eq!(ids, vec!["E1", "E2"]);
    }

    #[test]
    fn pre_resolved_id_skips_resolver() {
        let mut p = base();
        p["globalEventId"] = json!("GLOBAL-7");
        let out = MarketNormalizer::new(Arc::new(Failing)).normalize(&quote(Provider::B, p));
        assert_eq!(out.markets[0].event_id, "GLOBAL-7");
    }

    #[test]
    fn identity_purge_reaches_the_resolver() {
        let norm = MarketNormalizer::new(Arc::new(identity::TeamPairResolver::default()));
        assert_eq!(norm.normalize(&quote(Provider::A, base())).markets.len(), 1);

        assert_eq!(norm.purge_identities(Utc::now() - chrono::Duration::minutes(5)), 0);
        // one link, one fixture
        assert_eq!(norm.purge_identities(Utc::now() + chrono::Duration::seconds(1)), 2);
        // resolvers without expiry keep everything
        assert_eq!(normalizer(vec!["E1"]).purge_identities(Utc::now()), 0);
    }

    #[test]
    fn resolver_failure_is_empty_identity() {
        let out = MarketNormalizer::new(Arc::new(Failing)).normalize(&quote(Provider::A, base()));
        assert!(out.markets.is_empty());
        assert_eq!(out.rejections[0].reason, RejectReason::EmptyIdentity);
        assert_eq!(out.rejections[0].raw_value, "88123");
    }

    #[test]
    fn synthetic_raw_ids_fall_back_to_team_names() {
        let mut p = base();
        p["matchId"] = json!(12.5);
        assert!(looks_synthetic(&p["matchId"]));
        assert!(looks_synthetic(&json!("0")));
        assert!(looks_synthetic(&json!("ab")));
        assert!(!looks_synthetic(&json!(88123)));
        assert_eq!(synthetic_raw_id("FC Porto", "Benfica").as_deref(), Some("syn_porto_vs_benfica"));

        p["home"] = json!("");
        p["away"] = json!("");
        let out = normalizer(vec!["E1"]).normalize(&quote(Provider::A, p));
        assert_eq!(out.rejections[0].reason, RejectReason::EmptyIdentity);
    }

    #[test]
    fn deny_listed_and_unknown_types() {
        let mut p = base();
        p["marketType"] = json!("CORNER KICKS");
        let out = normalizer(vec!["E1"]).normalize(&quote(Provider::A, p.clone()));
        assert_eq!(out.rejections[0].reason, RejectReason::NotSupportedType);

        p["marketType"] = json!("1X2");
        let out = normalizer(vec!["E1"]).normalize(&quote(Provider::A, p));
        assert_eq!(out.rejections[0].reason, RejectReason::NotSupportedType);
    }

    #[test]
    fn each_gate_tags_its_reason() {
        let cases = [
            ("line", json!("???"), RejectReason::InvalidLine),
            ("selection", json!("draw"), RejectReason::InvalidSelection),
            ("odds", json!("abc"), RejectReason::InvalidOdds),
            ("odds", json!(0), RejectReason::InvalidOdds),
            ("odds", json!(0.001), RejectReason::OddsTooLow),
        ];
        for (field, value, reason) in cases {
            let mut p = base();
            p[field] = value;
            let out = normalizer(vec!["E1"]).normalize(&quote(Provider::A, p));
            assert!(out.markets.is_empty());
            assert_eq!(out.rejections[0].reason, reason, "field {field}");
            assert_eq!(out.rejections[0].event_id, "E1");
        }
    }

    #[test]
    fn line_falls_through_candidates() {
        let mut p = base();
        p["line"] = json!("n/a");
        p["hdp"] = json!("0/0.5");
        let out = normalizer(vec!["E1"]).normalize(&quote(Provider::A, p));
        assert_eq!(out.markets[0].line, 0.25);
    }

    #[test]
    fn team_name_selection_and_score() {
        let mut p = base();
        p["selection"] = json!("Chelsea");
        p["line"] = json!("0.5");
        p["score"] = json!("1-0");
        let out = normalizer(vec!["E1"]).normalize(&quote(Provider::A, p));
        assert_eq!(out.markets[0].selection, Selection::Away);
        assert_eq!(out.markets[0].score.as_deref(), Some("1-0"));
    }

    #[test]
    fn sub_markets_are_classified_one_by_one() {
        let p = json!({
            "matchId": "88123",
            "home": "Arsenal",
            "away": "Chelsea",
            "Markets": [
                {"marketType": "OU", "line": "2.5", "selection": "Over", "odds": 0.9},
                {"marketType": "Total Corners", "line": "9.5", "selection": "Over", "odds": 0.9},
                {"marketType": "7", "line": "-0.25", "selection": "1", "odds": -1.21},
                {"marketType": "HDP", "line": "x", "selection": "Home", "odds": 0.9}
            ]
        });
        let out = normalizer(vec!["E1"]).normalize(&quote(Provider::B, p));
        assert_eq!(out.markets.len(), 2);
        assert_eq!(out.markets[0].market_type, MarketType::FtOu);
        assert_eq!(out.markets[1].market_type, MarketType::HtHdp);
        assert_eq!(out.markets[1].odds, 1.8264);
        let reasons: Vec<RejectReason> = out.rejections.iter().map(|r| r.reason).collect();
        assert_eq!(reasons, vec![RejectReason::NotSupportedType, RejectReason::InvalidLine]);
    }

    #[test]
    fn bare_odds_array_infers_home_away_pair() {
        let p = json!({
            "matchId": "88123",
            "home": "Arsenal",
            "away": "Chelsea",
            "odds": [0.95, {"price": 0.91}]
        });
        let out = normalizer(vec!["E1"]).normalize(&quote(Provider::A, p));
        assert_eq!(out.markets.len(), 2);
        assert_eq!(out.markets[0].selection, Selection::Home);
        assert_eq!(out.markets[1].selection, Selection::Away);
        assert_eq!(out.markets[1].odds, 1.91);
        assert!(out.markets.iter().all(|m| m.market_type == MarketType::FtHdp && m.line == 0.0));
    }

    #[test]
    fn provider_b_aliases() {
        let p = json!({
            "MatchNo": 99001,
            "HTeam": "Lazio",
            "ATeam": "Roma",
            "OddsType": "FT_OU",
            "Goal": "2.5/3",
            "Side": "Under",
            "Odds": "-0.95"
        });
        let out = normalizer(vec!["E9"]).normalize(&quote(Provider::B, p));
        let m = &out.markets[0];
        assert_eq!(m.line, 2.75);
        assert_eq!(m.selection, Selection::Under);
        assert_eq!(m.home, "Lazio");
    }
}
