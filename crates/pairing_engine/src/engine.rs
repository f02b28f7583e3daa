//! Pairing state owned by exactly one task: event buckets, active pairs,
//! the decider and the counters. Every method takes `&mut self`; callers
//! serialize access through the actor in `actor.rs`.

use crate::bucket::{EventBucket, Upsert, BUCKET_CAP};
use crate::signature::{
    check_signature, complementary, force_disp_id, liquidity_guard, pair_id, PairRejectReason,
    LINE_TOLERANCE,
};
use arb_detector::trade::Trade;
use arb_detector::{ArbitrageDecider, Decision};
use chrono::{DateTime, Duration, Utc};
use logger::{
    event_prefix, now_iso, AccountPurgedEvent, BypassToggledEvent, EngineHeartbeatEvent, EventLogger,
    PairCreatedEvent, QuoteRejectedEvent,
};
use market_normalizer::types::{MarketType, NormalizedMarket, Provider};
use market_normalizer::Rejection;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PairStatus {
    #[serde(rename = "PAIRED")]
    Paired,
    /// One-sided display record; never an arbitrage signal.
    #[serde(rename = "FORCE_DISP")]
    ForceDisp,
}

#[derive(Debug, Clone, Serialize)]
pub struct PairedMatch {
    pub pair_id:     String,
    pub event_id:    String,
    pub market_type: MarketType,
    pub leg_a:       Option<NormalizedMarket>,
    pub leg_b:       Option<NormalizedMarket>,
    pub score:       f64,
    pub status:      PairStatus,
    pub profit:      String,
    pub profit_pct:  Option<f64>,
    pub created_at:  DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

impl PairedMatch {
    fn has_account(&self, account: &str) -> bool {
        [&self.leg_a, &self.leg_b]
            .into_iter()
            .flatten()
            .any(|leg| leg.account.as_deref() == Some(account))
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineCounters {
    pub quotes_ingested:    u64,
    pub quotes_rejected:    u64,
    pub rejected_by_reason: BTreeMap<String, u64>,
    pub pairs_created:      u64,
    pub pairs_refreshed:    u64,
    pub force_disp:         u64,
    pub trades:             u64,
    pub aborts:             u64,
}

/// One rejected quote, as handed to the rejection hook.
#[derive(Debug, Clone, Serialize)]
pub struct RejectionRecord {
    pub ts:        DateTime<Utc>,
    pub stage:     &'static str,
    pub reason:    &'static str,
    pub provider:  String,
    pub event_id:  String,
    pub market:    String,
    pub raw_value: String,
}

pub type RejectionHook = Box<dyn Fn(&RejectionRecord) + Send>;

#[derive(Debug, Clone)]
pub struct EngineLimits {
    pub ttl:        Duration,
    pub bucket_cap: usize,
    pub tolerance:  f64,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self { ttl: Duration::minutes(5), bucket_cap: BUCKET_CAP, tolerance: LINE_TOLERANCE }
    }
}

#[derive(Debug, Default)]
pub struct IngestOutcome {
    pub rejected:  Option<PairRejectReason>,
    pub new_pairs: Vec<PairedMatch>,
    pub refreshed: usize,
    pub trades:    Vec<Trade>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    pub buckets: usize,
    pub pairs:   usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmergencyPass {
    pub created: usize,
    pub retired: usize,
}

impl EmergencyPass {
    pub fn changed(&self) -> bool {
        self.created + self.retired > 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub ts:            DateTime<Utc>,
    pub buckets:       usize,
    pub active_pairs:  Vec<PairedMatch>,
    pub trades:        Vec<Trade>,
    pub counters:      EngineCounters,
    pub bypass_active: bool,
}

pub struct PairingEngine {
    limits:        EngineLimits,
    buckets:       HashMap<String, EventBucket>,
    pairs:         HashMap<String, PairedMatch>,
    decider:       ArbitrageDecider,
    counters:      EngineCounters,
    logger:        Option<EventLogger>,
    on_reject:     Option<RejectionHook>,
    last_activity: DateTime<Utc>,
}

impl PairingEngine {
    pub fn new(decider: ArbitrageDecider) -> Self {
        Self {
            limits: EngineLimits::default(),
            buckets: HashMap::new(),
            pairs: HashMap::new(),
            decider,
            counters: EngineCounters::default(),
            logger: None,
            on_reject: None,
            last_activity: Utc::now(),
        }
    }

    pub fn with_limits(mut self, limits: EngineLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_logger(mut self, logger: EventLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_rejection_hook(mut self, hook: RejectionHook) -> Self {
        self.on_reject = Some(hook);
        self
    }

    pub fn limits(&self) -> &EngineLimits {
        &self.limits
    }

    pub fn counters(&self) -> &EngineCounters {
        &self.counters
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn bucket(&self, event_id: &str) -> Option<&EventBucket> {
        self.buckets.get(event_id)
    }

    pub fn trade_history(&self) -> Vec<Trade> {
        self.decider.history()
    }

    /// Active pairs, most recently touched first.
    pub fn get_active_pairs(&self) -> Vec<PairedMatch> {
        let mut pairs: Vec<PairedMatch> = self.pairs.values().cloned().collect();
        pairs.sort_by(|a, b| b.last_update.cmp(&a.last_update).then_with(|| a.pair_id.cmp(&b.pair_id)));
        pairs
    }

    pub fn snapshot_at(&self, now: DateTime<Utc>) -> EngineSnapshot {
        EngineSnapshot {
            ts: now,
            buckets: self.buckets.len(),
            active_pairs: self.get_active_pairs(),
            trades: self.trade_history(),
            counters: self.counters.clone(),
            bypass_active: self.decider.bypass_active_at(now),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record_rejection(
        &mut self,
        stage: &'static str,
        reason: &'static str,
        provider: Provider,
        event_id: &str,
        market: &str,
        raw_value: &str,
        now: DateTime<Utc>,
    ) {
        self.counters.quotes_rejected += 1;
        *self.counters.rejected_by_reason.entry(reason.to_string()).or_default() += 1;

        debug!(stage, reason, provider = %provider, market, raw_value, "{} rejected", event_prefix(event_id, 12));

        if let Some(logger) = &self.logger {
            logger.log_quiet(&QuoteRejectedEvent {
                ts:           now_iso(),
                event:        "QUOTE_REJECTED",
                stage,
                reason:       reason.to_string(),
                provider:     provider.to_string(),
                event_prefix: event_prefix(event_id, 12),
                market:       market.to_string(),
                raw_value:    raw_value.to_string(),
            });
        }
        if let Some(hook) = &self.on_reject {
            hook(&RejectionRecord {
                ts: now,
                stage,
                reason,
                provider: provider.to_string(),
                event_id: event_id.to_string(),
                market: market.to_string(),
                raw_value: raw_value.to_string(),
            });
        }
    }

    /// Account for a normalization rejection.
    pub fn reject_normalized(&mut self, r: &Rejection, now: DateTime<Utc>) {
        self.record_rejection("normalize", r.reason.code(), r.provider, &r.event_id, &r.market, &r.raw_value, now);
    }

    pub fn ingest(&mut self, market: NormalizedMarket) -> IngestOutcome {
        self.ingest_at(market, Utc::now())
    }

    /// Buffer one leg, then scan the opposite provider's list for partners.
    pub fn ingest_at(&mut self, market: NormalizedMarket, now: DateTime<Utc>) -> IngestOutcome {
        self.last_activity = now;

        if let Err(reason) = check_signature(&market) {
            let raw = format!("{}@{}", market.selection, market.line);
            self.record_rejection("pairing", reason.code(), market.provider, &market.event_id, &market.key, &raw, now);
            return IngestOutcome { rejected: Some(reason), ..Default::default() };
        }
        self.counters.quotes_ingested += 1;

        let cap = self.limits.bucket_cap;
        let tolerance = self.limits.tolerance;
        let bucket = self
            .buckets
            .entry(market.event_id.clone())
            .or_insert_with(|| EventBucket::with_cap(market.event_id.clone(), cap, now));

        if let Upsert::Evicted(old) = bucket.upsert(market.clone(), now) {
            debug!(event_id = %old.event_id, key = %old.key, "bucket full, oldest quote evicted");
        }

        let partners: Vec<NormalizedMarket> = bucket
            .side(market.provider.opposite())
            .iter()
            .filter(|other| complementary(&market, other, tolerance))
            .cloned()
            .collect();

        let mut out = IngestOutcome::default();
        for other in partners {
            let (a, b) = match market.provider {
                Provider::A => (&market, &other),
                Provider::B => (&other, &market),
            };
            let id = pair_id(&a.event_id, a.market_type, a.line, a.selection, b.selection);

            if let Some(existing) = self.pairs.get_mut(&id) {
                existing.last_update = now;
                self.counters.pairs_refreshed += 1;
                out.refreshed += 1;
                continue;
            }

            if let Err(reason) = liquidity_guard(a.odds).and_then(|_| liquidity_guard(b.odds)) {
                let bad = if liquidity_guard(a.odds).is_err() { a } else { b };
                let raw = bad.odds.to_string();
                self.record_rejection("pairing", reason.code(), bad.provider, &bad.event_id, &bad.key, &raw, now);
                continue;
            }

            let pair = self.create_pair(id, a, b, now, &mut out);
            out.new_pairs.push(pair);
        }
        out
    }

    fn create_pair(
        &mut self,
        pair_id: String,
        a: &NormalizedMarket,
        b: &NormalizedMarket,
        now: DateTime<Utc>,
        out: &mut IngestOutcome,
    ) -> PairedMatch {
        let eval = self.decider.evaluate_at(a, b, now);
        match eval.decision {
            Decision::Executed(trade) => {
                self.counters.trades += 1;
                out.trades.push(trade);
            }
            Decision::Aborted(_) => self.counters.aborts += 1,
            Decision::BelowThreshold => {}
        }

        let pair = PairedMatch {
            pair_id:     pair_id.clone(),
            event_id:    a.event_id.clone(),
            market_type: a.market_type,
            leg_a:       Some(a.clone()),
            leg_b:       Some(b.clone()),
            score:       1.0,
            status:      PairStatus::Paired,
            profit:      eval.profit.clone(),
            profit_pct:  Some(eval.profit_pct),
            created_at:  now,
            last_update: now,
        };
        self.counters.pairs_created += 1;

        info!(
            pair_id = %pair_id,
            profit = %eval.profit,
            "{} {} {}@{} / {}@{} paired",
            event_prefix(&a.event_id, 12),
            a.market_type,
            a.selection,
            a.odds,
            b.selection,
            b.odds
        );
        if let Some(logger) = &self.logger {
            logger.log_quiet(&PairCreatedEvent {
                ts:          now_iso(),
                event:       "PAIR_CREATED",
                pair_id:     pair_id.clone(),
                event_id:    a.event_id.clone(),
                market:      a.market_type.to_string(),
                line_a:      a.line,
                line_b:      b.line,
                selection_a: a.selection.to_string(),
                selection_b: b.selection.to_string(),
                odds_a:      a.odds,
                odds_b:      b.odds,
                profit:      eval.profit,
            });
        }

        self.pairs.insert(pair_id, pair.clone());
        pair
    }

    pub fn purge(&mut self) -> PurgeStats {
        self.purge_at(Utc::now())
    }

    /// Drop buckets and pairs untouched for longer than the TTL.
    pub fn purge_at(&mut self, now: DateTime<Utc>) -> PurgeStats {
        let cutoff = now - self.limits.ttl;
        let (buckets_before, pairs_before) = (self.buckets.len(), self.pairs.len());

        self.buckets.retain(|_, b| b.last_update >= cutoff && !b.is_empty());
        self.pairs.retain(|_, p| p.last_update >= cutoff);

        let stats = PurgeStats {
            buckets: buckets_before - self.buckets.len(),
            pairs:   pairs_before - self.pairs.len(),
        };
        if stats != PurgeStats::default() {
            debug!(buckets = stats.buckets, pairs = stats.pairs, "purged stale state");
        }
        stats
    }

    /// Build 0.5-score display records for buckets with only one side, and
    /// retire the ones whose quote was replaced, evicted or paired since.
    pub fn emergency_pass_at(&mut self, now: DateTime<Utc>) -> EmergencyPass {
        let live: HashSet<String> = self
            .buckets
            .values()
            .filter_map(|b| b.one_sided().map(|side| b.side(side)))
            .flatten()
            .map(force_disp_id)
            .collect();
        let before = self.pairs.len();
        self.pairs.retain(|id, p| p.status != PairStatus::ForceDisp || live.contains(id));
        let mut pass = EmergencyPass { created: 0, retired: before - self.pairs.len() };

        for bucket in self.buckets.values() {
            let Some(side) = bucket.one_sided() else { continue };
            for quote in bucket.side(side) {
                let (leg_a, leg_b) = match side {
                    Provider::A => (Some(quote.clone()), None),
                    Provider::B => (None, Some(quote.clone())),
                };
                let id = force_disp_id(quote);
                if let Some(existing) = self.pairs.get_mut(&id) {
                    existing.leg_a = leg_a;
                    existing.leg_b = leg_b;
                    existing.last_update = bucket.last_update;
                    continue;
                }
                self.pairs.insert(
                    id.clone(),
                    PairedMatch {
                        pair_id: id,
                        event_id: quote.event_id.clone(),
                        market_type: quote.market_type,
                        leg_a,
                        leg_b,
                        score: 0.5,
                        status: PairStatus::ForceDisp,
                        profit: "n/a".to_string(),
                        profit_pct: None,
                        created_at: now,
                        last_update: bucket.last_update,
                    },
                );
                pass.created += 1;
            }
        }
        self.counters.force_disp += pass.created as u64;
        pass
    }

    /// Forget everything scraped under `account`. Returns (quotes, pairs) removed.
    pub fn purge_account(&mut self, account: &str) -> (usize, usize) {
        let quotes: usize = self.buckets.values_mut().map(|b| b.remove_account(account)).sum();
        self.buckets.retain(|_, b| !b.is_empty());

        let before = self.pairs.len();
        self.pairs.retain(|_, p| !p.has_account(account));
        let pairs = before - self.pairs.len();

        info!(account, quotes, pairs, "account purged");
        if let Some(logger) = &self.logger {
            logger.log_quiet(&AccountPurgedEvent {
                ts:             now_iso(),
                event:          "ACCOUNT_PURGED",
                account:        account.to_string(),
                quotes_removed: quotes,
                pairs_removed:  pairs,
            });
        }
        (quotes, pairs)
    }

    pub fn set_bypass(&mut self, until: Option<DateTime<Utc>>) {
        match until {
            Some(t) => warn!(until = %t, "profit bypass ON"),
            None => info!("profit bypass OFF"),
        }
        self.decider.set_bypass(until);
        if let Some(logger) = &self.logger {
            logger.log_quiet(&BypassToggledEvent {
                ts:    now_iso(),
                event: "BYPASS_TOGGLED",
                until: until.map(|t| t.to_rfc3339()),
            });
        }
    }

    pub fn bypass_active_at(&self, now: DateTime<Utc>) -> bool {
        self.decider.bypass_active_at(now)
    }

    /// Periodic status line + audit heartbeat.
    pub fn heartbeat_at(&self, now: DateTime<Utc>) -> EngineHeartbeatEvent {
        let hb = EngineHeartbeatEvent {
            ts:              now.to_rfc3339(),
            event:           "ENGINE_HEARTBEAT",
            buckets:         self.buckets.len(),
            active_pairs:    self.pairs.len(),
            quotes_ingested: self.counters.quotes_ingested,
            quotes_rejected: self.counters.quotes_rejected,
            pairs_created:   self.counters.pairs_created,
            trades:          self.counters.trades,
            idle_secs:       (now - self.last_activity).num_seconds(),
        };
        info!(
            "HB: buckets={}, pairs={}, ingested={}, rejected={}, trades={}, idle={}s",
            hb.buckets, hb.active_pairs, hb.quotes_ingested, hb.quotes_rejected, hb.trades, hb.idle_secs
        );
        if let Some(logger) = &self.logger {
            logger.log_quiet(&hb);
        }
        hb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::quote;
    use arb_detector::config::StaticConfigSource;
    use arb_detector::gate::OpenGate;
    use arb_detector::trade::NullSink;
    use arb_detector::DeciderConfig;
    use market_normalizer::types::Selection;
    use std::sync::{Arc, Mutex};

    fn engine() -> PairingEngine {
        PairingEngine::new(ArbitrageDecider::new(
            Box::new(StaticConfigSource(DeciderConfig::default())),
            Arc::new(OpenGate),
            Arc::new(NullSink),
        ))
    }

    #[test]
    fn complementary_legs_pair_once() {
        let mut e = engine();
        let now = Utc::now();
        let a = quote(Provider::A, -0.5, Selection::Home, 1.95);
        let b = quote(Provider::B, 0.5, Selection::Away, 1.98);

        assert!(e.ingest_at(a.clone(), now).new_pairs.is_empty());
        let out = e.ingest_at(b.clone(), now);
        assert_eq!(out.new_pairs.len(), 1);
        assert_eq!(out.new_pairs[0].profit, "-1.79%");
        assert!(out.trades.is_empty());

        let later = now + Duration::seconds(3);
        let again = e.ingest_at(a, later);
        assert!(again.new_pairs.is_empty());
        assert_eq!(again.refreshed, 1);
        e.ingest_at(b, later);

        let pairs = e.get_active_pairs();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].last_update, later);
        assert_eq!(pairs[0].created_at, now);
        assert_eq!(e.counters().pairs_created, 1);
        assert_eq!(e.counters().pairs_refreshed, 2);
    }

    #[test]
    fn same_provider_never_pairs_with_itself() {
        let mut e = engine();
        e.ingest(quote(Provider::A, -0.5, Selection::Home, 1.95));
        let out = e.ingest(quote(Provider::A, 0.5, Selection::Away, 1.98));
        assert!(out.new_pairs.is_empty());
    }

    #[test]
    fn liquidity_guard_blocks_pairing() {
        let mut e = engine();
        e.ingest(quote(Provider::A, -0.5, Selection::Home, 150.0));
        let out = e.ingest(quote(Provider::B, 0.5, Selection::Away, 1.9));
        assert!(out.new_pairs.is_empty());
        assert_eq!(e.counters().rejected_by_reason.get("LIQUIDITY_GUARD"), Some(&1));
    }

    #[test]
    fn signature_gate_rejects_without_buffering() {
        let mut e = engine();
        let mut q = quote(Provider::A, 0.0, Selection::Over, 1.9);
        let out = e.ingest(q.clone());
        assert_eq!(out.rejected, Some(PairRejectReason::MissingSide));
        assert_eq!(e.bucket_count(), 0);

        q.selection = Selection::Home;
        q.event_id = String::new();
        assert_eq!(e.ingest(q).rejected, Some(PairRejectReason::MissingEvent));
        assert_eq!(e.counters().quotes_rejected, 2);
    }

    #[test]
    fn profitable_pair_produces_trade() {
        let mut e = engine();
        e.ingest(quote(Provider::A, -0.5, Selection::Home, 2.1));
        let out = e.ingest(quote(Provider::B, 0.5, Selection::Away, 2.1));
        assert_eq!(out.trades.len(), 1);
        assert_eq!(out.trades[0].stake, 50.0);
        assert_eq!(e.trade_history().len(), 1);
        assert_eq!(e.counters().trades, 1);
    }

    #[test]
    fn ttl_purge_removes_stale_state() {
        let mut e = engine();
        let t0 = Utc::now();
        e.ingest_at(quote(Provider::A, -0.5, Selection::Home, 1.95), t0);
        e.ingest_at(quote(Provider::B, 0.5, Selection::Away, 1.98), t0);

        assert_eq!(e.purge_at(t0 + Duration::minutes(4)), PurgeStats::default());
        assert_eq!(e.bucket_count(), 1);

        let stats = e.purge_at(t0 + Duration::minutes(5) + Duration::seconds(1));
        assert_eq!(stats, PurgeStats { buckets: 1, pairs: 1 });
        assert!(e.get_active_pairs().is_empty());
        assert!(e.bucket("E").is_none());
    }

    #[test]
    fn emergency_pass_shows_one_sided_then_retires() {
        let mut e = engine();
        let now = Utc::now();
        e.ingest_at(quote(Provider::A, -0.5, Selection::Home, 1.95), now);
        e.ingest_at(quote(Provider::A, 0.0, Selection::Home, 1.8), now);

        assert_eq!(e.emergency_pass_at(now), EmergencyPass { created: 2, retired: 0 });
        assert!(!e.emergency_pass_at(now).changed());
        let pairs = e.get_active_pairs();
        assert_eq!(pairs.len(), 2);
        assert!(pairs.iter().all(|p| p.status == PairStatus::ForceDisp && p.score == 0.5 && p.leg_b.is_none()));

        e.ingest_at(quote(Provider::B, 0.5, Selection::Away, 1.98), now);
        assert_eq!(e.emergency_pass_at(now), EmergencyPass { created: 0, retired: 2 });
        let pairs = e.get_active_pairs();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].status, PairStatus::Paired);
    }

    #[test]
    fn one_sided_record_tracks_the_latest_quote() {
        let mut e = engine();
        let now = Utc::now();
        e.ingest_at(quote(Provider::A, -0.5, Selection::Home, 1.9), now);
        e.emergency_pass_at(now);

        e.ingest_at(quote(Provider::A, -0.5, Selection::Home, 2.5), now);
        assert!(!e.emergency_pass_at(now).changed());

        let pairs = e.get_active_pairs();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].leg_a.as_ref().map(|q| q.odds), Some(2.5));
        assert_eq!(e.bucket("E").map(|b| b.side(Provider::A)[0].odds), Some(2.5));
    }

    #[test]
    fn evicted_quote_loses_its_display_record() {
        let limits = EngineLimits { bucket_cap: 1, ..Default::default() };
        let mut e = engine().with_limits(limits);
        let now = Utc::now();
        e.ingest_at(quote(Provider::A, -0.5, Selection::Home, 1.9), now);
        e.emergency_pass_at(now);

        e.ingest_at(quote(Provider::A, 0.0, Selection::Home, 1.8), now);
        assert_eq!(e.emergency_pass_at(now), EmergencyPass { created: 1, retired: 1 });

        let pairs = e.get_active_pairs();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].leg_a.as_ref().map(|q| q.line), Some(0.0));
    }

    #[test]
    fn account_purge_drops_quotes_and_pairs() {
        let mut e = engine();
        let mut a = quote(Provider::A, -0.5, Selection::Home, 1.95);
        a.account = Some("acc-a".into());
        e.ingest(a);
        e.ingest(quote(Provider::B, 0.5, Selection::Away, 1.98));
        assert_eq!(e.get_active_pairs().len(), 1);

        assert_eq!(e.purge_account("acc-a"), (1, 1));
        assert!(e.get_active_pairs().is_empty());
        assert_eq!(e.bucket("E").map(|b| b.len()), Some(1));
        assert_eq!(e.purge_account("nobody"), (0, 0));
    }

    #[test]
    fn rejection_hook_and_audit_log_see_rejections() {
        let dir = tempfile::tempdir().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut e = engine()
            .with_logger(EventLogger::new(dir.path()))
            .with_rejection_hook(Box::new(move |r: &RejectionRecord| sink.lock().unwrap().push(r.reason)));

        e.ingest(quote(Provider::A, f64::INFINITY, Selection::Home, 1.9));
        assert_eq!(*seen.lock().unwrap(), vec!["missing_line"]);

        let date = Utc::now().format("%Y-%m-%d").to_string();
        let body = std::fs::read_to_string(dir.path().join(format!("{date}.jsonl"))).unwrap();
        assert!(body.contains("\"QUOTE_REJECTED\""));
        assert!(body.contains("\"missing_line\""));
    }

    #[test]
    fn bypass_toggle_and_heartbeat() {
        let mut e = engine();
        let now = Utc::now();
        e.set_bypass(Some(now + Duration::seconds(30)));
        assert!(e.bypass_active_at(now));
        e.set_bypass(None);
        assert!(!e.bypass_active_at(now));

        e.ingest_at(quote(Provider::A, 0.0, Selection::Home, 1.9), now);
        let hb = e.heartbeat_at(now + Duration::seconds(20));
        assert_eq!(hb.idle_secs, 20);
        assert_eq!(hb.buckets, 1);
    }
}
