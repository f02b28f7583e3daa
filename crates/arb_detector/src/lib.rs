/// Dual-feed arb: Arbitrage Decider
/// Implied-sum profit of two complementary legs, capped for display,
/// then score lock → safety gate → stake rounding → Trade.

pub mod config;
pub mod gate;
pub mod stake;
pub mod trade;

use chrono::{DateTime, Utc};
use config::{CachedConfig, ConfigSource};
use gate::{ExecutionBlockedError, ExecutionGate, ExecutionRequest};
use logger::{event_prefix, now_iso, EventLogger, TradeAbortedEvent, TradeExecutedEvent};
use market_normalizer::types::NormalizedMarket;
use std::sync::Arc;
use tracing::{debug, info, warn};
use trade::{Trade, TradeHistory, TradeSink, TradeStatus};

pub use config::{DeciderConfig, StakeTier};
pub use trade::HISTORY_CAP;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AbortReason {
    #[error("score lock: {score_a} vs {score_b}")]
    ScoreLock { score_a: String, score_b: String },
    #[error("gate blocked: {0}")]
    GateBlocked(ExecutionBlockedError),
    #[error("configured stake {configured} is below the minimum step")]
    StakeTooSmall { configured: f64 },
}

impl AbortReason {
    pub fn code(&self) -> &'static str {
        match self {
            AbortReason::ScoreLock { .. } => "SCORE_LOCK",
            AbortReason::GateBlocked(_) => "GATE_BLOCKED",
            AbortReason::StakeTooSmall { .. } => "STAKE_TOO_SMALL",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Decision {
    BelowThreshold,
    Executed(Trade),
    Aborted(AbortReason),
}

#[derive(Debug, Clone)]
pub struct Evaluation {
    /// True computed value, uncapped.
    pub raw_profit_pct: f64,
    /// Capped (and possibly bypass-forced) value used for decisions.
    pub profit_pct:     f64,
    /// `profit_pct` rendered as `"12.34%"`.
    pub profit:         String,
    pub decision:       Decision,
}

/// `(1 - (1/a + 1/b)) * 100`
pub fn profit_percent(odds_a: f64, odds_b: f64) -> f64 {
    (1.0 - (1.0 / odds_a + 1.0 / odds_b)) * 100.0
}

/// Clamp into `[-cap, cap]`.
pub fn cap_profit(profit_pct: f64, cap: f64) -> f64 {
    // not clamp(): that panics on a NaN cap
    profit_pct.max(-cap).min(cap)
}

pub fn format_profit(profit_pct: f64) -> String {
    format!("{profit_pct:.2}%")
}

fn same_score(a: &str, b: &str) -> bool {
    let squash = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
    squash(a) == squash(b)
}

pub struct ArbitrageDecider {
    config:       CachedConfig,
    gate:         Arc<dyn ExecutionGate>,
    sink:         Arc<dyn TradeSink>,
    history:      TradeHistory,
    bypass_until: Option<DateTime<Utc>>,
    logger:       Option<EventLogger>,
    seq:          u64,
}

impl ArbitrageDecider {
    pub fn new(
        source: Box<dyn ConfigSource>,
        gate: Arc<dyn ExecutionGate>,
        sink: Arc<dyn TradeSink>,
    ) -> Self {
        Self {
            config: CachedConfig::with_default_ttl(source),
            gate,
            sink,
            history: TradeHistory::default(),
            bypass_until: None,
            logger: None,
            seq: 0,
        }
    }

    pub fn with_logger(mut self, logger: EventLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// `None` switches bypass off.
    pub fn set_bypass(&mut self, until: Option<DateTime<Utc>>) {
        self.bypass_until = until;
    }

    pub fn bypass_active_at(&self, now: DateTime<Utc>) -> bool {
        self.bypass_until.is_some_and(|t| now < t)
    }

    pub fn history(&self) -> Vec<Trade> {
        self.history.snapshot()
    }

    pub fn trade_count(&self) -> usize {
        self.history.len()
    }

    pub fn evaluate(&mut self, leg_a: &NormalizedMarket, leg_b: &NormalizedMarket) -> Evaluation {
        self.evaluate_at(leg_a, leg_b, Utc::now())
    }

    pub fn evaluate_at(
        &mut self,
        leg_a: &NormalizedMarket,
        leg_b: &NormalizedMarket,
        now: DateTime<Utc>,
    ) -> Evaluation {
        let cfg = self.config.get_at(now).clone();
        let raw = profit_percent(leg_a.odds, leg_b.odds);
        let mut shown = cap_profit(raw, cfg.max_profit_pct);

        let bypassed = self.bypass_active_at(now) && shown > 0.0 && shown <= cfg.min_profit_pct;
        if bypassed {
            shown = cfg.bypass_floor_pct;
        }

        let decision = if shown > cfg.min_profit_pct || bypassed {
            match self.execute(leg_a, leg_b, shown, bypassed, &cfg, now) {
                Ok(trade) => Decision::Executed(trade),
                Err(reason) => {
                    self.log_abort(leg_a, shown, &reason);
                    Decision::Aborted(reason)
                }
            }
        } else {
            debug!(event_id = %leg_a.event_id, profit = raw, "below threshold");
            Decision::BelowThreshold
        };

        Evaluation { raw_profit_pct: raw, profit_pct: shown, profit: format_profit(shown), decision }
    }

    fn execute(
        &mut self,
        leg_a: &NormalizedMarket,
        leg_b: &NormalizedMarket,
        profit_pct: f64,
        bypassed: bool,
        cfg: &DeciderConfig,
        now: DateTime<Utc>,
    ) -> Result<Trade, AbortReason> {
        if let (Some(sa), Some(sb)) = (&leg_a.score, &leg_b.score) {
            if !same_score(sa, sb) {
                return Err(AbortReason::ScoreLock { score_a: sa.clone(), score_b: sb.clone() });
            }
        }

        for leg in [leg_a, leg_b] {
            let request = ExecutionRequest { account: leg.account.clone(), provider_id: leg.provider };
            self.gate.assert_executable(&request).map_err(AbortReason::GateBlocked)?;
        }

        let configured = cfg.stake_for(profit_pct);
        let stake = stake::round_stake(configured).ok_or(AbortReason::StakeTooSmall { configured })?;

        self.seq += 1;
        let trade = Trade {
            id:          format!("T-{}-{}", now.timestamp_millis(), self.seq),
            event_id:    leg_a.event_id.clone(),
            market_type: leg_a.market_type,
            leg_a:       leg_a.clone(),
            leg_b:       leg_b.clone(),
            odds_a:      leg_a.odds,
            odds_b:      leg_b.odds,
            profit_pct,
            profit:      format_profit(profit_pct),
            stake,
            status:      if bypassed { TradeStatus::Simulated } else { TradeStatus::Submitted },
            bypassed,
            created_at:  now,
        };

        if let Err(e) = self.sink.save_trade(&trade) {
            warn!(trade_id = %trade.id, "trade persistence failed: {e:#}");
        }
        if let Some(logger) = &self.logger {
            logger.log_quiet(&TradeExecutedEvent {
                ts:         now_iso(),
                event:      "TRADE_EXECUTED",
                trade_id:   trade.id.clone(),
                event_id:   trade.event_id.clone(),
                market:     trade.market_type.to_string(),
                odds_a:     trade.odds_a,
                odds_b:     trade.odds_b,
                profit_pct,
                stake,
                bypassed,
            });
        }
        info!(
            trade_id = %trade.id,
            profit = %trade.profit,
            stake,
            bypassed,
            "{} {} trade built",
            event_prefix(&trade.event_id, 12),
            trade.market_type
        );

        self.history.push(trade.clone());
        Ok(trade)
    }

    fn log_abort(&self, leg_a: &NormalizedMarket, profit_pct: f64, reason: &AbortReason) {
        warn!(
            event_id = %leg_a.event_id,
            market = %leg_a.market_type,
            reason = reason.code(),
            "execution aborted: {reason}"
        );
        if let Some(logger) = &self.logger {
            logger.log_quiet(&TradeAbortedEvent {
                ts:         now_iso(),
                event:      "TRADE_ABORTED",
                reason:     reason.code().to_string(),
                detail:     reason.to_string(),
                event_id:   leg_a.event_id.clone(),
                market:     leg_a.market_type.to_string(),
                profit_pct,
            });
        }
    }
}
