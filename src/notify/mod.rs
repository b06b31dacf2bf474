// src/notify/mod.rs
//! Notification deriver and notification-log helpers.
//!
//! A notification fires for a record that is `new` or `updated` in the
//! reconciled catalog, belongs to a subscribed category, and did not already
//! carry that same status under the same id before the run. The last
//! condition is what keeps repeat runs from re-announcing the same transition.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::model::{EventRecord, EventStatus, NotificationEvent};

fn message_for(record: &EventRecord) -> Option<String> {
    let label = match record.status {
        EventStatus::New => "New",
        EventStatus::Updated => "Updated",
        _ => return None,
    };
    Some(format!("{label} event: {}", record.title))
}

/// Notifications for fresh new/updated transitions, in `new_catalog` order.
pub fn derive_notifications(
    old_catalog: &[EventRecord],
    new_catalog: &[EventRecord],
    subscribed_categories: &HashSet<String>,
    now: DateTime<Utc>,
) -> Vec<NotificationEvent> {
    if subscribed_categories.is_empty() {
        return Vec::new();
    }

    let previous: HashMap<&str, EventStatus> = old_catalog
        .iter()
        .map(|r| (r.id.as_str(), r.status))
        .collect();

    new_catalog
        .iter()
        .filter(|r| subscribed_categories.contains(&r.category))
        .filter(|r| previous.get(r.id.as_str()) != Some(&r.status))
        .filter_map(|r| {
            let message = message_for(r)?;
            Some(NotificationEvent {
                id: uuid::Uuid::new_v4().to_string(),
                message,
                event_id: r.id.clone(),
                timestamp: now,
                read: false,
            })
        })
        .collect()
}

/// Newest-first log: fresh notifications go in front of the existing ones.
pub fn prepend(
    fresh: Vec<NotificationEvent>,
    log: Vec<NotificationEvent>,
) -> Vec<NotificationEvent> {
    let mut out = fresh;
    out.extend(log);
    out
}

/// Returns true if a notification with `id` was found.
pub fn mark_read(log: &mut [NotificationEvent], id: &str) -> bool {
    match log.iter_mut().find(|n| n.id == id) {
        Some(n) => {
            n.read = true;
            true
        }
        None => false,
    }
}

pub fn unread_count(log: &[NotificationEvent]) -> usize {
    log.iter().filter(|n| !n.read).count()
}
