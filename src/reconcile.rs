//! # Reconciler
//! Pure merge of a freshly fetched batch into the existing catalog.
//! No I/O; the clock and the id source are the only inputs besides the data.
//!
//! Policy: records are matched across runs by a [`MatchKey`]. The default
//! [`TitleKey`] treats two items with the same title as the same real-world
//! event, even if every other field changed. That conflates distinct events
//! sharing a title and loses track of an event whose title is corrected
//! upstream; [`VenueDateTitleKey`] is the stricter alternative.
//!
//! Status rules:
//! - matched + material change (date, venue, description) -> `updated`
//! - matched, unchanged -> status kept (an `inactive` record stays inactive)
//! - unmatched -> `inactive`, unless already inactive or `imported`
//! - `imported` is never changed here; its audit fields survive every refresh
//! - unseen keys -> new record with status `new`

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::model::{EventRecord, EventStatus, IncomingItem};

/// Identity used to pair an existing record with an incoming item.
pub trait MatchKey: Send + Sync {
    fn record_key(&self, record: &EventRecord) -> String;
    fn item_key(&self, item: &IncomingItem) -> String;
}

impl<K: MatchKey + ?Sized> MatchKey for Box<K> {
    fn record_key(&self, record: &EventRecord) -> String {
        (**self).record_key(record)
    }
    fn item_key(&self, item: &IncomingItem) -> String {
        (**self).item_key(item)
    }
}

/// Exact title match.
#[derive(Debug, Clone, Copy, Default)]
pub struct TitleKey;

impl MatchKey for TitleKey {
    fn record_key(&self, record: &EventRecord) -> String {
        record.title.clone()
    }
    fn item_key(&self, item: &IncomingItem) -> String {
        item.title.clone()
    }
}

/// Venue + date + case/whitespace-normalised title.
#[derive(Debug, Clone, Copy, Default)]
pub struct VenueDateTitleKey;

impl VenueDateTitleKey {
    fn compose(venue: &str, date_time: &str, title: &str) -> String {
        // Date part only: a corrected start time should still match.
        let day = date_time.get(..10).unwrap_or(date_time);
        format!(
            "{}|{}|{}",
            normalize_key_part(venue),
            day,
            normalize_key_part(title)
        )
    }
}

impl MatchKey for VenueDateTitleKey {
    fn record_key(&self, record: &EventRecord) -> String {
        Self::compose(&record.venue_name, &record.date_time, &record.title)
    }
    fn item_key(&self, item: &IncomingItem) -> String {
        Self::compose(&item.venue_name, &item.date_time, &item.title)
    }
}

fn normalize_key_part(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Generates ids for newly created records.
pub type IdGen = Box<dyn Fn() -> String + Send + Sync>;

pub fn uuid_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub struct Reconciler<K: MatchKey = TitleKey> {
    key: K,
    next_id: IdGen,
}

impl Default for Reconciler<TitleKey> {
    fn default() -> Self {
        Self::new(TitleKey)
    }
}

impl<K: MatchKey> Reconciler<K> {
    pub fn new(key: K) -> Self {
        Self {
            key,
            next_id: Box::new(uuid_id),
        }
    }

    pub fn with_id_gen(mut self, next_id: IdGen) -> Self {
        self.next_id = next_id;
        self
    }

    /// Merge `incoming` into a copy of `existing`.
    /// Output order: existing records in their original order, then new
    /// records in batch order.
    pub fn reconcile(
        &self,
        existing: &[EventRecord],
        incoming: &[IncomingItem],
        now: DateTime<Utc>,
    ) -> Vec<EventRecord> {
        // Last write wins on duplicate keys within one batch.
        let mut by_key: HashMap<String, &IncomingItem> = HashMap::with_capacity(incoming.len());
        for item in incoming {
            by_key.insert(self.key.item_key(item), item);
        }

        let mut out = Vec::with_capacity(existing.len() + incoming.len());
        let mut existing_keys: HashSet<String> = HashSet::with_capacity(existing.len());

        for record in existing {
            let key = self.key.record_key(record);
            let mut next = record.clone();
            match by_key.get(&key) {
                Some(item) => {
                    if next.status != EventStatus::Imported && next.differs_materially(item) {
                        next.status = EventStatus::Updated;
                    }
                    next.refresh_from(item, now);
                }
                None => {
                    if !matches!(next.status, EventStatus::Imported | EventStatus::Inactive) {
                        next.status = EventStatus::Inactive;
                        next.last_scraped_time = now;
                    }
                }
            }
            existing_keys.insert(key);
            out.push(next);
        }

        let mut created: HashSet<String> = HashSet::new();
        for item in incoming {
            let key = self.key.item_key(item);
            if existing_keys.contains(&key) || !created.insert(key.clone()) {
                continue;
            }
            let latest = by_key.get(&key).copied().unwrap_or(item);
            out.push(EventRecord::from_incoming(
                (self.next_id)(),
                latest.clone(),
                now,
            ));
        }

        out
    }
}

/// Reconcile with the default title-matching policy and UUID ids.
pub fn reconcile(
    existing: &[EventRecord],
    incoming: &[IncomingItem],
    now: DateTime<Utc>,
) -> Vec<EventRecord> {
    Reconciler::<TitleKey>::default().reconcile(existing, incoming, now)
}
