use chrono::Utc;
use market_normalizer::types::{MarketType, NormalizedMarket, Provider, Selection};

/// FT handicap leg on event `E`.
pub fn quote(provider: Provider, line: f64, selection: Selection, odds: f64) -> NormalizedMarket {
    NormalizedMarket {
        key: NormalizedMarket::market_key("E", MarketType::FtHdp, line),
        event_id: "E".into(),
        market_type: MarketType::FtHdp,
        period: MarketType::FtHdp.period(),
        line,
        selection,
        odds,
        raw_odds: odds - 1.0,
        market_name_raw: "HDP".into(),
        selection_id: None,
        provider,
        bookmaker: String::new(),
        league: String::new(),
        home: "H".into(),
        away: "A".into(),
        score: None,
        account: None,
        received_at: Utc::now(),
    }
}
