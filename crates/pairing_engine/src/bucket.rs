//! Per-event, per-provider quote buffers.

use chrono::{DateTime, Utc};
use market_normalizer::types::{NormalizedMarket, Provider};
use std::collections::VecDeque;

pub const BUCKET_CAP: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub enum Upsert {
    /// Same `(type, line, selection)` was already buffered; latest quote wins.
    Replaced,
    Appended,
    /// Appended, and the oldest entry fell off.
    Evicted(Box<NormalizedMarket>),
}

#[derive(Debug, Clone)]
pub struct EventBucket {
    pub event_id:    String,
    quotes_a:        VecDeque<NormalizedMarket>,
    quotes_b:        VecDeque<NormalizedMarket>,
    cap:             usize,
    pub last_update: DateTime<Utc>,
}

impl EventBucket {
    pub fn new(event_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::with_cap(event_id, BUCKET_CAP, now)
    }

    pub fn with_cap(event_id: impl Into<String>, cap: usize, now: DateTime<Utc>) -> Self {
        Self {
            event_id: event_id.into(),
            quotes_a: VecDeque::new(),
            quotes_b: VecDeque::new(),
            cap: cap.max(1),
            last_update: now,
        }
    }

    pub fn side(&self, provider: Provider) -> &VecDeque<NormalizedMarket> {
        match provider {
            Provider::A => &self.quotes_a,
            Provider::B => &self.quotes_b,
        }
    }

    fn side_mut(&mut self, provider: Provider) -> &mut VecDeque<NormalizedMarket> {
        match provider {
            Provider::A => &mut self.quotes_a,
            Provider::B => &mut self.quotes_b,
        }
    }

    pub fn upsert(&mut self, market: NormalizedMarket, now: DateTime<Utc>) -> Upsert {
        self.last_update = now;
        let cap = self.cap;
        let list = self.side_mut(market.provider);

        if let Some(slot) = list.iter_mut().find(|q| q.same_slot(&market)) {
            *slot = market;
            return Upsert::Replaced;
        }

        list.push_back(market);
        if list.len() > cap {
            if let Some(old) = list.pop_front() {
                return Upsert::Evicted(Box::new(old));
            }
        }
        Upsert::Appended
    }

    pub fn len(&self) -> usize {
        self.quotes_a.len() + self.quotes_b.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes_a.is_empty() && self.quotes_b.is_empty()
    }

    /// The only provider with data, if exactly one side is populated.
    pub fn one_sided(&self) -> Option<Provider> {
        match (self.quotes_a.is_empty(), self.quotes_b.is_empty()) {
            (false, true) => Some(Provider::A),
            (true, false) => Some(Provider::B),
            _ => None,
        }
    }

    /// Drop every quote scraped under `account`. Returns how many went.
    pub fn remove_account(&mut self, account: &str) -> usize {
        let before = self.len();
        for list in [&mut self.quotes_a, &mut self.quotes_b] {
            list.retain(|q| q.account.as_deref() != Some(account));
        }
        before - self.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::quote;
    use market_normalizer::types::Selection;

    #[test]
    fn same_slot_replaces() {
        let now = Utc::now();
        let mut b = EventBucket::new("E", now);
        assert_eq!(b.upsert(quote(Provider::A, -0.5, Selection::Home, 1.9), now), Upsert::Appended);
        assert_eq!(b.upsert(quote(Provider::A, -0.5, Selection::Home, 1.95), now), Upsert::Replaced);
        assert_eq!(b.side(Provider::A).len(), 1);
        assert_eq!(b.side(Provider::A)[0].odds, 1.95);
    }

    #[test]
    fn fifty_first_quote_evicts_oldest() {
        let now = Utc::now();
        let mut b = EventBucket::new("E", now);
        for i in 0..BUCKET_CAP {
            b.upsert(quote(Provider::B, i as f64 * 0.25, Selection::Away, 1.9), now);
        }
        assert_eq!(b.side(Provider::B).len(), BUCKET_CAP);

        match b.upsert(quote(Provider::B, 100.0, Selection::Away, 1.9), now) {
            Upsert::Evicted(old) => assert_eq!(old.line, 0.0),
            other => panic!("expected eviction, got {other:?}"),
        }
        assert_eq!(b.side(Provider::B).len(), BUCKET_CAP);
        assert_eq!(b.side(Provider::B)[0].line, 0.25);
    }

    #[test]
    fn one_sided_and_account_removal() {
        let now = Utc::now();
        let mut b = EventBucket::new("E", now);
        assert_eq!(b.one_sided(), None);

        let mut q = quote(Provider::A, 0.0, Selection::Home, 1.9);
        q.account = Some("acc1".into());
        b.upsert(q, now);
        assert_eq!(b.one_sided(), Some(Provider::A));

        b.upsert(quote(Provider::B, 0.0, Selection::Away, 1.9), now);
        assert_eq!(b.one_sided(), None);

        assert_eq!(b.remove_account("acc1"), 1);
        assert_eq!(b.one_sided(), Some(Provider::B));
    }
}
