//! Decider configuration: env-backed source plus a short TTL cache.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StakeTier {
    pub min_profit_pct: f64,
    pub stake:          f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeciderConfig {
    pub min_profit_pct:   f64,
    pub max_profit_pct:   f64,
    /// Sorted ascending by `min_profit_pct`.
    pub stake_tiers:      Vec<StakeTier>,
    pub bypass_floor_pct: f64,
}

impl Default for DeciderConfig {
    fn default() -> Self {
        Self {
            min_profit_pct:   1.0,
            max_profit_pct:   20.0,
            stake_tiers:      vec![StakeTier { min_profit_pct: 0.0, stake: 50.0 }],
            bypass_floor_pct: 1.5,
        }
    }
}

impl DeciderConfig {
    /// Build from a key lookup; missing keys keep their defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();
        let num = |key: &str| -> Result<Option<f64>> {
            match get(key) {
                Some(v) if !v.trim().is_empty() => {
                    let x: f64 = v.trim().parse().with_context(|| format!("{key}={v:?} is not a number"))?;
                    Ok(Some(x))
                }
                _ => Ok(None),
            }
        };

        if let Some(x) = num("ARB_MIN_PROFIT_PCT")? {
            cfg.min_profit_pct = x;
        }
        if let Some(x) = num("ARB_MAX_PROFIT_PCT")? {
            cfg.max_profit_pct = x;
        }
        if let Some(x) = num("ARB_BYPASS_FLOOR_PCT")? {
            cfg.bypass_floor_pct = x;
        }
        if let Some(raw) = get("ARB_STAKE_TIERS").filter(|s| !s.trim().is_empty()) {
            cfg.stake_tiers = parse_stake_tiers(&raw)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Finite numbers only, a positive cap above the trade threshold, and
    /// non-negative stakes.
    pub fn validate(&self) -> Result<()> {
        for (key, x) in [
            ("min_profit_pct", self.min_profit_pct),
            ("max_profit_pct", self.max_profit_pct),
            ("bypass_floor_pct", self.bypass_floor_pct),
        ] {
            if !x.is_finite() {
                bail!("{key} must be a finite number, got {x}");
            }
        }
        if self.max_profit_pct <= 0.0 {
            bail!("max_profit_pct must be positive, got {}", self.max_profit_pct);
        }
        if self.min_profit_pct >= self.max_profit_pct {
            bail!(
                "min_profit_pct ({}) must be below max_profit_pct ({})",
                self.min_profit_pct,
                self.max_profit_pct
            );
        }
        for t in &self.stake_tiers {
            if !t.min_profit_pct.is_finite() || !t.stake.is_finite() || t.stake < 0.0 {
                bail!("bad stake tier {}:{}", t.min_profit_pct, t.stake);
            }
        }
        Ok(())
    }

    /// Stake of the highest tier whose threshold the profit reaches; 0 when none.
    pub fn stake_for(&self, profit_pct: f64) -> f64 {
        self.stake_tiers
            .iter()
            .filter(|t| t.min_profit_pct <= profit_pct)
            .last()
            .map(|t| t.stake)
            .unwrap_or(0.0)
    }
}

/// `"0:50,3:100"` → tiers sorted by threshold.
pub fn parse_stake_tiers(raw: &str) -> Result<Vec<StakeTier>> {
    let mut tiers = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (min, stake) = part
            .split_once(':')
            .with_context(|| format!("stake tier {part:?} is not <min_profit>:<stake>"))?;
        let tier = StakeTier {
            min_profit_pct: min.trim().parse().with_context(|| format!("bad tier threshold in {part:?}"))?,
            stake:          stake.trim().parse().with_context(|| format!("bad tier stake in {part:?}"))?,
        };
        if !tier.min_profit_pct.is_finite() || !tier.stake.is_finite() || tier.stake < 0.0 {
            bail!("stake tier {part:?} needs finite numbers and a non-negative stake");
        }
        tiers.push(tier);
    }
    tiers.sort_by(|a, b| a.min_profit_pct.total_cmp(&b.min_profit_pct));
    Ok(tiers)
}

pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Result<DeciderConfig>;
}

pub struct EnvConfigSource;

impl ConfigSource for EnvConfigSource {
    fn load(&self) -> Result<DeciderConfig> {
        DeciderConfig::from_lookup(|k| std::env::var(k).ok())
    }
}

pub struct StaticConfigSource(pub DeciderConfig);

impl ConfigSource for StaticConfigSource {
    fn load(&self) -> Result<DeciderConfig> {
        Ok(self.0.clone())
    }
}

/// Re-reads the source once the TTL has elapsed. A failed reload keeps the
/// last good value.
pub struct CachedConfig {
    source:    Box<dyn ConfigSource>,
    ttl:       Duration,
    current:   DeciderConfig,
    loaded_at: Option<DateTime<Utc>>,
}

impl CachedConfig {
    pub fn new(source: Box<dyn ConfigSource>, ttl: Duration) -> Self {
        Self { source, ttl, current: DeciderConfig::default(), loaded_at: None }
    }

    pub fn with_default_ttl(source: Box<dyn ConfigSource>) -> Self {
        Self::new(source, Duration::seconds(10))
    }

    pub fn get_at(&mut self, now: DateTime<Utc>) -> &DeciderConfig {
        let stale = self.loaded_at.map_or(true, |t| now - t >= self.ttl);
        if stale {
            match self.source.load().and_then(|cfg| cfg.validate().map(|()| cfg)) {
                Ok(cfg) => self.current = cfg,
                Err(e) => warn!("config reload failed, keeping previous values: {e:#}"),
            }
            self.loaded_at = Some(now);
        }
        &self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_env_is_empty() {
        let cfg = DeciderConfig::from_lookup(|_| None).unwrap();
        assert_eq!(cfg, DeciderConfig::default());
        assert_eq!(cfg.stake_for(1.2), 50.0);
    }

    #[test]
    fn env_overrides_and_tiers() {
        let cfg = DeciderConfig::from_lookup(lookup(&[
            ("ARB_MIN_PROFIT_PCT", "0.5"),
            ("ARB_STAKE_TIERS", "3:100, 0:20 ,1.5:40"),
        ]))
        .unwrap();
        assert_eq!(cfg.min_profit_pct, 0.5);
        assert_eq!(cfg.stake_for(0.7), 20.0);
        assert_eq!(cfg.stake_for(2.0), 40.0);
        assert_eq!(cfg.stake_for(7.0), 100.0);
        assert_eq!(cfg.stake_for(-1.0), 0.0);
    }

    #[test]
    fn malformed_values_are_errors() {
        assert!(DeciderConfig::from_lookup(lookup(&[("ARB_MIN_PROFIT_PCT", "abc")])).is_err());
        assert!(parse_stake_tiers("3-100").is_err());
        assert!(DeciderConfig::from_lookup(lookup(&[("ARB_MAX_PROFIT_PCT", "0")])).is_err());

        for bad in ["NaN", "inf", "-inf"] {
            assert!(DeciderConfig::from_lookup(lookup(&[("ARB_MAX_PROFIT_PCT", bad)])).is_err(), "max={bad}");
            assert!(DeciderConfig::from_lookup(lookup(&[("ARB_MIN_PROFIT_PCT", bad)])).is_err(), "min={bad}");
            assert!(DeciderConfig::from_lookup(lookup(&[("ARB_BYPASS_FLOOR_PCT", bad)])).is_err(), "floor={bad}");
        }
        assert!(DeciderConfig::from_lookup(lookup(&[("ARB_MIN_PROFIT_PCT", "20")])).is_err());
        assert!(DeciderConfig::from_lookup(lookup(&[("ARB_MIN_PROFIT_PCT", "25"), ("ARB_MAX_PROFIT_PCT", "10")])).is_err());

        assert!(parse_stake_tiers("NaN:50").is_err());
        assert!(parse_stake_tiers("0:inf").is_err());
        assert!(parse_stake_tiers("0:-5").is_err());
        assert!(DeciderConfig::from_lookup(lookup(&[("ARB_STAKE_TIERS", "0:50,inf:100")])).is_err());
    }

    #[test]
    fn cache_refuses_invalid_source_values() {
        let bad = DeciderConfig { max_profit_pct: f64::NAN, ..DeciderConfig::default() };
        let mut cache = CachedConfig::with_default_ttl(Box::new(StaticConfigSource(bad)));
        assert_eq!(cache.get_at(Utc::now()), &DeciderConfig::default());
    }

    struct Flaky {
        calls: Arc<AtomicUsize>,
    }

    impl ConfigSource for Flaky {
        fn load(&self) -> Result<DeciderConfig> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Ok(DeciderConfig { min_profit_pct: 2.0, ..DeciderConfig::default() })
            } else {
                bail!("source down")
            }
        }
    }

    #[test]
    fn cache_respects_ttl_and_keeps_last_good() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut cache = CachedConfig::with_default_ttl(Box::new(Flaky { calls: calls.clone() }));
        let t0 = Utc::now();

        assert_eq!(cache.get_at(t0).min_profit_pct, 2.0);
        cache.get_at(t0 + Duration::seconds(5));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(cache.get_at(t0 + Duration::seconds(11)).min_profit_pct, 2.0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
