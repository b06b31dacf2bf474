//! Administrative catalog actions and dashboard/feed views.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::model::{EventRecord, EventStatus};

/// The only path by which a record reaches `imported`.
pub fn mark_imported(
    catalog: &[EventRecord],
    id: &str,
    imported_by: &str,
    notes: Option<String>,
    now: DateTime<Utc>,
) -> SyncResult<Vec<EventRecord>> {
    if !catalog.iter().any(|e| e.id == id) {
        return Err(SyncError::NotFound(id.to_string()));
    }
    let notes = notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
    Ok(catalog
        .iter()
        .map(|e| {
            if e.id != id {
                return e.clone();
            }
            EventRecord {
                status: EventStatus::Imported,
                imported_at: Some(now),
                imported_by: Some(imported_by.to_string()),
                import_notes: notes.clone(),
                ..e.clone()
            }
        })
        .collect())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total: usize,
    pub new: usize,
    pub leads: usize,
    pub imported: usize,
}

pub fn dashboard_stats(catalog: &[EventRecord], lead_count: usize) -> DashboardStats {
    DashboardStats {
        total: catalog.len(),
        new: catalog.iter().filter(|e| e.status == EventStatus::New).count(),
        leads: lead_count,
        imported: catalog
            .iter()
            .filter(|e| e.status == EventStatus::Imported)
            .count(),
    }
}

/// Dashboard filter. Empty fields match everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilter {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub status: Option<EventStatus>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

impl EventFilter {
    pub fn matches(&self, e: &EventRecord) -> bool {
        if let Some(q) = self.search.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            let q = q.to_lowercase();
            if !e.title.to_lowercase().contains(&q) && !e.venue_name.to_lowercase().contains(&q) {
                return false;
            }
        }
        if let Some(city) = &self.city {
            if &e.city != city {
                return false;
            }
        }
        if let Some(status) = self.status {
            if e.status != status {
                return false;
            }
        }
        if let Some(cat) = &self.category {
            if &e.category != cat {
                return false;
            }
        }
        if self.from.is_some() || self.to.is_some() {
            // Records with an unparseable date only pass an unbounded filter.
            let Some(start) = e.starts_at() else {
                return false;
            };
            if self.from.is_some_and(|from| start < from) {
                return false;
            }
            if self.to.is_some_and(|to| start > to) {
                return false;
            }
        }
        true
    }

    pub fn apply(&self, catalog: &[EventRecord]) -> Vec<EventRecord> {
        catalog.iter().filter(|e| self.matches(e)).cloned().collect()
    }
}

/// Distinct, non-empty categories in sorted order.
pub fn categories(catalog: &[EventRecord]) -> Vec<String> {
    catalog
        .iter()
        .map(|e| e.category.trim())
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Public feed: everything not marked inactive, optionally one category.
pub fn public_feed(catalog: &[EventRecord], category: Option<&str>) -> Vec<EventRecord> {
    catalog
        .iter()
        .filter(|e| e.is_active())
        .filter(|e| category.map_or(true, |c| e.category == c))
        .cloned()
        .collect()
}

/// The imported event with the latest start.
pub fn featured(catalog: &[EventRecord]) -> Option<EventRecord> {
    catalog
        .iter()
        .filter(|e| e.status == EventStatus::Imported)
        .max_by_key(|e| e.starts_at())
        .cloned()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedStats {
    pub suggested: usize,
    pub upcoming: usize,
}

pub fn feed_stats(catalog: &[EventRecord], now: DateTime<Utc>) -> FeedStats {
    let imported = catalog.iter().filter(|e| e.status == EventStatus::Imported);
    let (mut suggested, mut upcoming) = (0, 0);
    for e in imported {
        suggested += 1;
        if e.starts_at().is_some_and(|s| s > now) {
            upcoming += 1;
        }
    }
    FeedStats {
        suggested,
        upcoming,
    }
}
