//! The one task that owns normalizer + engine. Quotes, admin commands and
//! maintenance timers all go through a single `select!` loop, so no two of
//! them ever interleave mid-mutation.

use crate::engine::{EngineSnapshot, PairedMatch, PairingEngine};
use arb_detector::trade::Trade;
use chrono::Utc;
use market_normalizer::types::{NormalizedMarket, RawQuote};
use market_normalizer::MarketNormalizer;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const SNAPSHOT_BATCH: usize = 100;

/// Longest bypass window a single command can open.
pub const MAX_BYPASS: Duration = Duration::from_secs(60 * 60);

#[derive(Debug)]
pub enum EngineCommand {
    Quote(RawQuote),
    Rebroadcast,
    /// `None` turns bypass off.
    SetBypass { duration: Option<Duration> },
    PurgeAccount { account: String },
    Snapshot(oneshot::Sender<EngineSnapshot>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PushEvent {
    QuoteUpdate(NormalizedMarket),
    PairSnapshot(Vec<PairedMatch>),
    TradeHistory(Vec<Trade>),
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub queue_capacity:    usize,
    pub push_capacity:     usize,
    pub purge_every:       Duration,
    pub broadcast_every:   Duration,
    pub idle_report_every: Duration,
    pub emergency_every:   Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            queue_capacity:    10_000,
            push_capacity:     1_024,
            purge_every:       Duration::from_secs(30),
            broadcast_every:   Duration::from_secs(1),
            idle_report_every: Duration::from_secs(15),
            emergency_every:   Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("engine task has stopped")]
pub struct EngineClosed;

#[derive(Clone)]
pub struct EngineHandle {
    tx:   mpsc::Sender<EngineCommand>,
    push: broadcast::Sender<PushEvent>,
}

impl EngineHandle {
    /// Never blocks the producer; a full queue drops the quote.
    pub fn submit_quote(&self, quote: RawQuote) -> bool {
        match self.tx.try_send(EngineCommand::Quote(quote)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("engine queue full, quote dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!("engine stopped, quote dropped");
                false
            }
        }
    }

    pub async fn command(&self, cmd: EngineCommand) -> Result<(), EngineClosed> {
        self.tx.send(cmd).await.map_err(|_| EngineClosed)
    }

    pub async fn rebroadcast(&self) -> Result<(), EngineClosed> {
        self.command(EngineCommand::Rebroadcast).await
    }

    pub async fn set_bypass(&self, duration: Option<Duration>) -> Result<(), EngineClosed> {
        self.command(EngineCommand::SetBypass { duration }).await
    }

    pub async fn purge_account(&self, account: impl Into<String>) -> Result<(), EngineClosed> {
        self.command(EngineCommand::PurgeAccount { account: account.into() }).await
    }

    pub async fn snapshot(&self) -> Result<EngineSnapshot, EngineClosed> {
        let (tx, rx) = oneshot::channel();
        self.command(EngineCommand::Snapshot(tx)).await?;
        rx.await.map_err(|_| EngineClosed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.push.subscribe()
    }
}

struct EngineTask {
    normalizer: MarketNormalizer,
    engine:     PairingEngine,
    push:       broadcast::Sender<PushEvent>,
    /// Pair set changed since the last snapshot went out.
    dirty:      bool,
}

impl EngineTask {
    fn emit(&self, ev: PushEvent) {
        // No subscribers is fine.
        let _ = self.push.send(ev);
    }

    fn broadcast_pairs(&mut self) {
        let pairs = self.engine.get_active_pairs();
        if pairs.is_empty() {
            self.emit(PushEvent::PairSnapshot(Vec::new()));
        }
        for batch in pairs.chunks(SNAPSHOT_BATCH) {
            self.emit(PushEvent::PairSnapshot(batch.to_vec()));
        }
        self.dirty = false;
    }

    fn handle_quote(&mut self, quote: RawQuote) {
        let now = Utc::now();
        let outcome = self.normalizer.normalize(&quote);
        for r in &outcome.rejections {
            self.engine.reject_normalized(r, now);
        }

        let mut traded = false;
        for market in outcome.markets {
            self.emit(PushEvent::QuoteUpdate(market.clone()));
            let res = self.engine.ingest_at(market, now);
            if !res.new_pairs.is_empty() || res.refreshed > 0 {
                self.dirty = true;
            }
            traded |= !res.trades.is_empty();
        }
        if traded {
            self.emit(PushEvent::TradeHistory(self.engine.trade_history()));
        }
    }

    fn handle(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Quote(q) => self.handle_quote(q),
            EngineCommand::Rebroadcast => {
                info!("full rebroadcast requested");
                self.broadcast_pairs();
                self.emit(PushEvent::TradeHistory(self.engine.trade_history()));
            }
            EngineCommand::SetBypass { duration: None } => self.engine.set_bypass(None),
            EngineCommand::SetBypass { duration: Some(d) } => {
                if d > MAX_BYPASS {
                    warn!(requested_secs = d.as_secs(), max_secs = MAX_BYPASS.as_secs(), "bypass clamped");
                }
                let until = chrono::Duration::from_std(d.min(MAX_BYPASS))
                    .ok()
                    .and_then(|d| Utc::now().checked_add_signed(d));
                match until {
                    Some(until) => self.engine.set_bypass(Some(until)),
                    None => warn!(requested_secs = d.as_secs(), "bypass rejected, window out of range"),
                }
            }
            EngineCommand::PurgeAccount { account } => {
                let (quotes, pairs) = self.engine.purge_account(&account);
                if quotes + pairs > 0 {
                    self.dirty = true;
                }
            }
            EngineCommand::Snapshot(reply) => {
                let _ = reply.send(self.engine.snapshot_at(Utc::now()));
            }
        }
    }
}

/// Spawn the owning task. It stops when every handle is dropped.
pub fn spawn_engine(
    normalizer: MarketNormalizer,
    engine: PairingEngine,
    settings: EngineSettings,
) -> (EngineHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(settings.queue_capacity.max(1));
    let (push, _) = broadcast::channel(settings.push_capacity.max(1));
    let handle = EngineHandle { tx, push: push.clone() };

    let mut task = EngineTask { normalizer, engine, push, dirty: false };

    let tick = |every: Duration| {
        let mut iv = interval_at(Instant::now() + every, every);
        iv.set_missed_tick_behavior(MissedTickBehavior::Delay);
        iv
    };

    let join = tokio::spawn(async move {
        let mut purge = tick(settings.purge_every);
        let mut broadcast_tick = tick(settings.broadcast_every);
        let mut idle = tick(settings.idle_report_every);
        let mut emergency = tick(settings.emergency_every);

        info!("pairing engine started");
        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(cmd) => task.handle(cmd),
                    None => break,
                },
                _ = purge.tick() => {
                    let now = Utc::now();
                    let stats = task.engine.purge_at(now);
                    if stats.pairs > 0 {
                        task.dirty = true;
                    }
                    task.normalizer.purge_identities(now - task.engine.limits().ttl);
                }
                _ = broadcast_tick.tick() => {
                    if task.dirty {
                        task.broadcast_pairs();
                    }
                }
                _ = idle.tick() => {
                    task.engine.heartbeat_at(Utc::now());
                }
                _ = emergency.tick() => {
                    let pass = task.engine.emergency_pass_at(Utc::now());
                    if pass.changed() {
                        debug!(created = pass.created, retired = pass.retired, "one-sided display records updated");
                        task.dirty = true;
                    }
                }
            }
        }
        info!("pairing engine stopped");
    });

    (handle, join)
}
