//! Domain records shared by the reconciler, the notification deriver, the
//! store and the HTTP API. The JSON shape is camelCase so persisted files stay
//! readable by the browser front end.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a catalog record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    New,
    Updated,
    Inactive,
    /// Terminal for the automated path; only `admin::mark_imported` sets it.
    Imported,
}

impl EventStatus {
    pub const ALL: [EventStatus; 4] = [
        EventStatus::New,
        EventStatus::Updated,
        EventStatus::Inactive,
        EventStatus::Imported,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::New => "new",
            EventStatus::Updated => "updated",
            EventStatus::Inactive => "inactive",
            EventStatus::Imported => "imported",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "new" => Ok(EventStatus::New),
            "updated" => Ok(EventStatus::Updated),
            "inactive" => Ok(EventStatus::Inactive),
            "imported" => Ok(EventStatus::Imported),
            other => Err(format!("unknown event status: {other}")),
        }
    }
}

/// One tracked event in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: String,
    pub title: String,
    /// ISO-8601 string as delivered by the source; compared verbatim.
    pub date_time: String,
    pub venue_name: String,
    #[serde(default)]
    pub venue_address: String,
    pub city: String,
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub source_name: String,
    pub original_url: String,
    pub last_scraped_time: DateTime<Utc>,
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imported_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imported_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_notes: Option<String>,
}

impl EventRecord {
    /// Build a fresh `new` record from a validated incoming item.
    pub fn from_incoming(id: String, item: IncomingItem, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: item.title,
            date_time: item.date_time,
            venue_name: item.venue_name,
            venue_address: item.venue_address,
            city: item.city,
            description: item.description,
            category: item.category,
            image_url: item.image_url,
            source_name: item.source_name,
            original_url: item.original_url,
            last_scraped_time: now,
            status: EventStatus::New,
            imported_at: None,
            imported_by: None,
            import_notes: None,
        }
    }

    /// Overwrite the scraped fields; id, status and audit fields are untouched.
    pub fn refresh_from(&mut self, item: &IncomingItem, now: DateTime<Utc>) {
        self.title = item.title.clone();
        self.date_time = item.date_time.clone();
        self.venue_name = item.venue_name.clone();
        self.venue_address = item.venue_address.clone();
        self.city = item.city.clone();
        self.description = item.description.clone();
        self.category = item.category.clone();
        self.image_url = item.image_url.clone();
        self.source_name = item.source_name.clone();
        self.original_url = item.original_url.clone();
        self.last_scraped_time = now;
    }

    /// Only schedule and description drift counts as a material change.
    pub fn differs_materially(&self, item: &IncomingItem) -> bool {
        item.date_time != self.date_time
            || item.venue_name != self.venue_name
            || item.description != self.description
    }

    pub fn is_active(&self) -> bool {
        self.status != EventStatus::Inactive
    }

    /// Parsed `date_time`, if the source delivered a valid RFC3339 value.
    pub fn starts_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.date_time)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// A validated candidate from the event source. No id, no status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingItem {
    pub title: String,
    pub date_time: String,
    pub venue_name: String,
    #[serde(default)]
    pub venue_address: String,
    pub city: String,
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub source_name: String,
    pub original_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub id: String,
    pub message: String,
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

/// Identity handed over by the external auth provider. Opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketLead {
    pub id: String,
    pub email: String,
    pub consent: bool,
    pub event_id: String,
    pub event_title: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreferences {
    #[serde(default)]
    pub categories: Vec<String>,
    pub last_notification_check: DateTime<Utc>,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            categories: Vec::new(),
            last_notification_check: Utc::now(),
        }
    }
}

/// Bundled starting catalog used when nothing has been persisted yet.
pub fn seed_catalog() -> anyhow::Result<Vec<EventRecord>> {
    let raw = include_str!("../config/seed_events.json");
    let events: Vec<EventRecord> = serde_json::from_str(raw)?;
    Ok(events)
}
