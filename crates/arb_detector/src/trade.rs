//! Trades, the capped execution history and the persistence seam.

use chrono::{DateTime, Utc};
use market_normalizer::types::{MarketType, NormalizedMarket};
use serde::Serialize;
use std::collections::VecDeque;

pub const HISTORY_CAP: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    Submitted,
    /// Built while the bypass toggle forced the profit; never a real order.
    Simulated,
}

#[derive(Debug, Clone, Serialize)]
pub struct Trade {
    pub id:          String,
    pub event_id:    String,
    pub market_type: MarketType,
    pub leg_a:       NormalizedMarket,
    pub leg_b:       NormalizedMarket,
    pub odds_a:      f64,
    pub odds_b:      f64,
    pub profit_pct:  f64,
    pub profit:      String,
    pub stake:       f64,
    pub status:      TradeStatus,
    pub bypassed:    bool,
    pub created_at:  DateTime<Utc>,
}

/// Best-effort persistence; a failure is logged by the caller, never fatal.
pub trait TradeSink: Send + Sync {
    fn save_trade(&self, trade: &Trade) -> anyhow::Result<()>;
}

pub struct NullSink;

impl TradeSink for NullSink {
    fn save_trade(&self, _trade: &Trade) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Most recent trades, newest first.
#[derive(Debug, Default)]
pub struct TradeHistory {
    trades: VecDeque<Trade>,
}

impl TradeHistory {
    pub fn push(&mut self, trade: Trade) {
        self.trades.push_front(trade);
        self.trades.truncate(HISTORY_CAP);
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    pub fn snapshot(&self) -> Vec<Trade> {
        self.trades.iter().cloned().collect()
    }
}
