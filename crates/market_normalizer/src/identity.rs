//! Identity resolution seam: raw provider match id → global event id(s).
//!
//! The production resolver lives outside this crate; `TeamPairResolver` is
//! the in-process stand-in used by the hub and the tests.

use crate::team_names::{canonicalize, similarity};
use crate::types::Provider;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityQuery {
    pub provider: Provider,
    pub raw_id:   String,
    pub home:     String,
    pub away:     String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("unresolvable event {raw_id} from provider {provider}")]
    Unresolvable { provider: Provider, raw_id: String },
    #[error("identity query is missing team names")]
    MissingTeams,
}

pub trait IdentityResolver: Send + Sync {
    fn resolve_global_event_id(&self, query: &IdentityQuery) -> Result<Vec<String>, IdentityError>;

    /// Forget anything not looked up since `cutoff`. Returns how many
    /// entries went away.
    fn purge_older_than(&self, _cutoff: DateTime<Utc>) -> usize {
        0
    }
}

#[derive(Debug, Clone)]
struct Fixture {
    id:        String,
    home:      String,
    away:      String,
    last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Link {
    ids:       Vec<String>,
    last_seen: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct ResolverState {
    links:    HashMap<(Provider, String), Link>,
    fixtures: Vec<Fixture>,
}

impl ResolverState {
    fn touch_fixtures(&mut self, ids: &[String], now: DateTime<Utc>) {
        for f in self.fixtures.iter_mut().filter(|f| ids.contains(&f.id)) {
            f.last_seen = now;
        }
    }
}

/// Clusters both streams by canonical team pair.
pub struct TeamPairResolver {
    threshold: f64,
    state:     Mutex<ResolverState>,
}

impl Default for TeamPairResolver {
    fn default() -> Self {
        Self::new(0.85)
    }
}

impl TeamPairResolver {
    pub fn new(threshold: f64) -> Self {
        Self { threshold, state: Mutex::new(ResolverState::default()) }
    }

    pub fn fixture_count(&self) -> usize {
        self.state.lock().map(|s| s.fixtures.len()).unwrap_or(0)
    }

    pub fn link_count(&self) -> usize {
        self.state.lock().map(|s| s.links.len()).unwrap_or(0)
    }

    fn fixture_id(home: &str, away: &str) -> String {
        let slug = |s: &str| canonicalize(s).replace(' ', "-");
        format!("ev_{}_vs_{}", slug(home), slug(away))
    }

    fn matches(&self, f: &Fixture, home: &str, away: &str) -> bool {
        let straight = similarity(&f.home, home) >= self.threshold
            && similarity(&f.away, away) >= self.threshold;
        let swapped = similarity(&f.home, away) >= self.threshold
            && similarity(&f.away, home) >= self.threshold;
        straight || swapped
    }
}

impl TeamPairResolver {
    /// Resolve and stamp the link and its fixtures as seen at `now`.
    pub fn resolve_at(&self, q: &IdentityQuery, now: DateTime<Utc>) -> Result<Vec<String>, IdentityError> {
        if q.raw_id.trim().is_empty() {
            return Err(IdentityError::Unresolvable { provider: q.provider, raw_id: q.raw_id.clone() });
        }
        let mut state = self.state.lock().map_err(|_| IdentityError::Unresolvable {
            provider: q.provider,
            raw_id: q.raw_id.clone(),
        })?;

        let link_key = (q.provider, q.raw_id.clone());
        if let Some(link) = state.links.get_mut(&link_key) {
            link.last_seen = now;
            let ids = link.ids.clone();
            state.touch_fixtures(&ids, now);
            return Ok(ids);
        }
        if canonicalize(&q.home).is_empty() || canonicalize(&q.away).is_empty() {
            return Err(IdentityError::MissingTeams);
        }

        let mut ids: Vec<String> = state
            .fixtures
            .iter()
            .filter(|f| self.matches(f, &q.home, &q.away))
            .map(|f| f.id.clone())
            .collect();

        if ids.is_empty() {
            let id = Self::fixture_id(&q.home, &q.away);
            state.fixtures.push(Fixture {
                id:        id.clone(),
                home:      q.home.clone(),
                away:      q.away.clone(),
                last_seen: now,
            });
            ids.push(id);
        } else {
            state.touch_fixtures(&ids, now);
        }

        state.links.insert(link_key, Link { ids: ids.clone(), last_seen: now });
        Ok(ids)
    }
}

impl IdentityResolver for TeamPairResolver {
    fn resolve_global_event_id(&self, q: &IdentityQuery) -> Result<Vec<String>, IdentityError> {
        self.resolve_at(q, Utc::now())
    }

    fn purge_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let Ok(mut state) = self.state.lock() else { return 0 };
        let before = state.links.len() + state.fixtures.len();
        state.links.retain(|_, l| l.last_seen >= cutoff);
        state.fixtures.retain(|f| f.last_seen >= cutoff);
        before - state.links.len() - state.fixtures.len()
    }
}
