//! Persistence for the four collections: catalog, notification log,
//! preferences and ticket leads. Each call is atomic on its own; nothing is
//! transactional across collections.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{anyhow, Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use crate::model::{EventRecord, NotificationEvent, TicketLead, UserPreferences};

#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn load_catalog(&self) -> Result<Vec<EventRecord>>;
    async fn save_catalog(&self, catalog: &[EventRecord]) -> Result<()>;
    async fn load_notifications(&self) -> Result<Vec<NotificationEvent>>;
    async fn save_notifications(&self, log: &[NotificationEvent]) -> Result<()>;
    async fn load_preferences(&self) -> Result<UserPreferences>;
    async fn save_preferences(&self, prefs: &UserPreferences) -> Result<()>;
    async fn load_leads(&self) -> Result<Vec<TicketLead>>;
    /// Newest first.
    async fn save_lead(&self, lead: &TicketLead) -> Result<()>;
}

const EVENTS: &str = "events";
const NOTIFICATIONS: &str = "notifications";
const PREFERENCES: &str = "preferences";
const LEADS: &str = "leads";

/// Writers of one collection are serialized; readers never block.
#[derive(Default)]
struct CollectionLocks {
    events: Mutex<()>,
    notifications: Mutex<()>,
    preferences: Mutex<()>,
    leads: Mutex<()>,
}

impl CollectionLocks {
    fn get(&self, name: &str) -> &Mutex<()> {
        match name {
            EVENTS => &self.events,
            NOTIFICATIONS => &self.notifications,
            PREFERENCES => &self.preferences,
            _ => &self.leads,
        }
    }
}

/// One pretty-printed JSON file per collection under `dir`.
pub struct JsonFileStore {
    dir: PathBuf,
    locks: CollectionLocks,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: CollectionLocks::default(),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    /// Missing file reads as `None`; a corrupt file is an error.
    async fn read<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.path(name);
        match fs::read_to_string(&path).await {
            Ok(s) => {
                let v = serde_json::from_str(&s)
                    .with_context(|| format!("decoding {}", path.display()))?;
                Ok(Some(v))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    async fn write<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        let _guard = self.locks.get(name).lock().await;
        self.write_unlocked(name, value).await
    }

    /// Write to a per-call temp file then rename over the target.
    /// Caller holds the collection lock.
    async fn write_unlocked<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let path = self.path(name);
        let tmp = tmp_path(&path);
        let bytes = serde_json::to_vec_pretty(value).context("encoding JSON")?;
        fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e).with_context(|| format!("renaming into {}", path.display()));
        }
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()))
}

#[async_trait::async_trait]
impl Store for JsonFileStore {
    async fn load_catalog(&self) -> Result<Vec<EventRecord>> {
        Ok(self.read(EVENTS).await?.unwrap_or_default())
    }

    async fn save_catalog(&self, catalog: &[EventRecord]) -> Result<()> {
        self.write(EVENTS, catalog).await
    }

    async fn load_notifications(&self) -> Result<Vec<NotificationEvent>> {
        Ok(self.read(NOTIFICATIONS).await?.unwrap_or_default())
    }

    async fn save_notifications(&self, log: &[NotificationEvent]) -> Result<()> {
        self.write(NOTIFICATIONS, log).await
    }

    async fn load_preferences(&self) -> Result<UserPreferences> {
        Ok(self.read(PREFERENCES).await?.unwrap_or_default())
    }

    async fn save_preferences(&self, prefs: &UserPreferences) -> Result<()> {
        self.write(PREFERENCES, prefs).await
    }

    async fn load_leads(&self) -> Result<Vec<TicketLead>> {
        Ok(self.read(LEADS).await?.unwrap_or_default())
    }

    async fn save_lead(&self, lead: &TicketLead) -> Result<()> {
        let _guard = self.locks.get(LEADS).lock().await;
        let mut leads = self.load_leads().await?;
        leads.insert(0, lead.clone());
        self.write_unlocked(LEADS, &leads).await
    }
}

#[derive(Default)]
struct MemoryState {
    catalog: Vec<EventRecord>,
    notifications: Vec<NotificationEvent>,
    preferences: Option<UserPreferences>,
    leads: Vec<TicketLead>,
}

/// In-memory store with switchable write failures, for tests and demos.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(catalog: Vec<EventRecord>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                catalog,
                ..Default::default()
            }),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// While set, every save returns an error and leaves data untouched.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("memory store: writes disabled"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn load_catalog(&self) -> Result<Vec<EventRecord>> {
        Ok(self.state.lock().await.catalog.clone())
    }

    async fn save_catalog(&self, catalog: &[EventRecord]) -> Result<()> {
        self.check_writable()?;
        self.state.lock().await.catalog = catalog.to_vec();
        Ok(())
    }

    async fn load_notifications(&self) -> Result<Vec<NotificationEvent>> {
        Ok(self.state.lock().await.notifications.clone())
    }

    async fn save_notifications(&self, log: &[NotificationEvent]) -> Result<()> {
        self.check_writable()?;
        self.state.lock().await.notifications = log.to_vec();
        Ok(())
    }

    async fn load_preferences(&self) -> Result<UserPreferences> {
        Ok(self
            .state
            .lock()
            .await
            .preferences
            .clone()
            .unwrap_or_default())
    }

    async fn save_preferences(&self, prefs: &UserPreferences) -> Result<()> {
        self.check_writable()?;
        self.state.lock().await.preferences = Some(prefs.clone());
        Ok(())
    }

    async fn load_leads(&self) -> Result<Vec<TicketLead>> {
        Ok(self.state.lock().await.leads.clone())
    }

    async fn save_lead(&self, lead: &TicketLead) -> Result<()> {
        self.check_writable()?;
        self.state.lock().await.leads.insert(0, lead.clone());
        Ok(())
    }
}
