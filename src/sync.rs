//! # Sync runner
//! One reconciliation run: load catalog, fetch candidates, validate,
//! reconcile, derive notifications, persist. At most one run (or catalog
//! mutation) is in flight at a time; overlapping triggers are rejected with
//! [`SyncError::Busy`] rather than queued.
//!
//! Failure semantics:
//! - fetch error or timeout: nothing is written, state is left as it was
//! - empty batch: treated as "no change" unless `allow_empty_batch`
//! - save error: the computed state is kept as a pending commit that
//!   [`SyncRunner::retry_save`] can write without fetching again. The next
//!   run reconciles against that parked catalog and carries its unsaved
//!   notifications into its own commit.
//!
//! Every read-modify-write of the notification log goes through the runner
//! and holds `log_lock`, so a commit and a read-mark cannot drop each other's
//! changes.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::admin;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::ingest::{self, providers::DynEventSource};
use crate::model::{seed_catalog, EventRecord, EventStatus, NotificationEvent};
use crate::notify;
use crate::reconcile::{MatchKey, Reconciler, TitleKey};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    Running,
}

/// Single-flight state holder: idle -> running -> idle.
#[derive(Debug, Default)]
pub struct SyncGuard {
    running: AtomicBool,
}

/// Held for the duration of a run; dropping it returns the guard to idle,
/// on success, error and panic alike.
#[must_use]
pub struct RunTicket<'a> {
    guard: &'a SyncGuard,
}

impl Drop for RunTicket<'_> {
    fn drop(&mut self) {
        self.guard.running.store(false, Ordering::Release);
    }
}

impl SyncGuard {
    pub fn try_begin(&self) -> Option<RunTicket<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunTicket { guard: self })
    }

    pub fn state(&self) -> SyncState {
        if self.running.load(Ordering::Acquire) {
            SyncState::Running
        } else {
            SyncState::Idle
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Manual,
    Scheduled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Committed,
    /// The source answered with nothing usable; catalog left untouched.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub outcome: RunOutcome,
    pub city: String,
    pub fetched: usize,
    pub dropped: usize,
    pub created: usize,
    pub updated: usize,
    pub deactivated: usize,
    /// Written by this commit, including any carried from a parked one.
    pub notifications: usize,
    pub catalog_size: usize,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub state: SyncState,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub pending_commit: bool,
}

#[derive(Debug, Default)]
struct StatusInner {
    last_sync_time: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Computed state that has not been fully written yet.
#[derive(Debug, Clone)]
struct PendingCommit {
    catalog: Vec<EventRecord>,
    catalog_saved: bool,
    fresh: Vec<NotificationEvent>,
}

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub fetch_timeout: Duration,
    pub allow_empty_batch: bool,
    pub save_retries: u32,
    pub save_backoff: Duration,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            allow_empty_batch: false,
            save_retries: 1,
            save_backoff: Duration::from_millis(200),
        }
    }
}

impl From<&SyncConfig> for RunnerOptions {
    fn from(cfg: &SyncConfig) -> Self {
        Self {
            fetch_timeout: Duration::from_secs(cfg.fetch_timeout_secs),
            allow_empty_batch: cfg.allow_empty_batch,
            save_retries: cfg.save_retries,
            ..Self::default()
        }
    }
}

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct SyncRunner {
    store: Arc<dyn Store>,
    source: DynEventSource,
    reconciler: Reconciler<Box<dyn MatchKey>>,
    opts: RunnerOptions,
    clock: Clock,
    guard: SyncGuard,
    status: StdMutex<StatusInner>,
    pending: Mutex<Option<PendingCommit>>,
    log_lock: Mutex<()>,
}

impl SyncRunner {
    pub fn new(store: Arc<dyn Store>, source: DynEventSource, opts: RunnerOptions) -> Self {
        Self {
            store,
            source,
            reconciler: Reconciler::new(Box::new(TitleKey) as Box<dyn MatchKey>),
            opts,
            clock: Arc::new(Utc::now),
            guard: SyncGuard::default(),
            status: StdMutex::new(StatusInner::default()),
            pending: Mutex::new(None),
            log_lock: Mutex::new(()),
        }
    }

    /// Swap the match policy (see `reconcile::VenueDateTitleKey`).
    pub fn with_match_key(mut self, key: impl MatchKey + 'static) -> Self {
        self.reconciler = Reconciler::new(Box::new(key) as Box<dyn MatchKey>);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    fn status_lock(&self) -> std::sync::MutexGuard<'_, StatusInner> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn status(&self) -> SyncStatus {
        let pending_commit = self.pending.lock().await.is_some();
        let inner = self.status_lock();
        SyncStatus {
            state: self.guard.state(),
            last_sync_time: inner.last_sync_time,
            last_error: inner.last_error.clone(),
            pending_commit,
        }
    }

    /// Persisted catalog, or the bundled seed if nothing was stored yet.
    pub async fn load_catalog_or_seed(&self) -> SyncResult<Vec<EventRecord>> {
        let catalog = self
            .store
            .load_catalog()
            .await
            .map_err(SyncError::persistence)?;
        if !catalog.is_empty() {
            return Ok(catalog);
        }
        seed_catalog().map_err(SyncError::persistence)
    }

    /// Run once. Rejected with `Busy` when another run holds the guard.
    pub async fn run_once(&self, city: &str, trigger: Trigger) -> SyncResult<SyncReport> {
        ingest::ensure_metrics_described();
        let Some(_ticket) = self.guard.try_begin() else {
            counter!("sync_busy_total").increment(1);
            debug!(target: "sync", ?trigger, "run already in flight; trigger ignored");
            return Err(SyncError::Busy);
        };

        info!(target: "sync", ?trigger, city, source = self.source.name(), "sync run started");
        let result = self.run_locked(city).await;

        let mut inner = self.status_lock();
        match &result {
            Ok(report) => {
                inner.last_error = None;
                if report.outcome == RunOutcome::Committed {
                    inner.last_sync_time = Some(report.finished_at);
                }
                info!(
                    target: "sync",
                    outcome = ?report.outcome,
                    created = report.created,
                    updated = report.updated,
                    deactivated = report.deactivated,
                    dropped = report.dropped,
                    notifications = report.notifications,
                    "sync run finished"
                );
            }
            Err(e) => {
                counter!("sync_failures_total", "kind" => e.kind()).increment(1);
                warn!(target: "sync", error = %e, "sync run failed");
                inner.last_error = Some(e.to_string());
            }
        }
        result
    }

    async fn run_locked(&self, city: &str) -> SyncResult<SyncReport> {
        // A parked commit is the latest computed state, saved or not.
        let parked = self.pending.lock().await.clone();
        let (old, carried) = match parked {
            Some(p) => (p.catalog, p.fresh),
            None => (self.load_catalog_or_seed().await?, Vec::new()),
        };

        let fetched = tokio::time::timeout(
            self.opts.fetch_timeout,
            ingest::fetch_validated(self.source.as_ref(), city),
        )
        .await
        .map_err(|_| {
            SyncError::SourceUnavailable(format!(
                "fetch timed out after {}s",
                self.opts.fetch_timeout.as_secs_f64()
            ))
        })?;
        let (incoming, dropped) = fetched?;

        let now = self.now();
        if incoming.is_empty() && !self.opts.allow_empty_batch {
            counter!("sync_skipped_total").increment(1);
            info!(target: "sync", dropped, "empty batch treated as no change");
            return Ok(SyncReport {
                outcome: RunOutcome::Skipped,
                city: city.to_string(),
                fetched: 0,
                dropped,
                created: 0,
                updated: 0,
                deactivated: 0,
                notifications: 0,
                catalog_size: old.len(),
                finished_at: now,
            });
        }

        let new = self.reconciler.reconcile(&old, &incoming, now);

        let prefs = self
            .store
            .load_preferences()
            .await
            .map_err(SyncError::persistence)?;
        let subscribed: HashSet<String> = prefs.categories.into_iter().collect();
        let derived = notify::derive_notifications(&old, &new, &subscribed, now);
        if !carried.is_empty() {
            debug!(target: "sync", carried = carried.len(), "carrying unsaved notifications");
        }
        let fresh = notify::prepend(derived, carried);

        let (created, updated, deactivated) = transitions(&old, &new);
        let report = SyncReport {
            outcome: RunOutcome::Committed,
            city: city.to_string(),
            fetched: incoming.len(),
            dropped,
            created,
            updated,
            deactivated,
            notifications: fresh.len(),
            catalog_size: new.len(),
            finished_at: now,
        };

        self.commit(PendingCommit {
            catalog: new,
            catalog_saved: false,
            fresh,
        })
        .await?;

        counter!("sync_runs_total").increment(1);
        gauge!("sync_last_run_ts").set(now.timestamp() as f64);
        Ok(report)
    }

    /// Write a pending commit, retrying per options. On final failure the
    /// commit is parked for `retry_save`, replacing any earlier one; callers
    /// fold the earlier one's unsaved notifications in before committing.
    async fn commit(&self, mut pending: PendingCommit) -> SyncResult<()> {
        let mut attempt = 0u32;
        loop {
            match self.try_commit(&mut pending).await {
                Ok(()) => {
                    *self.pending.lock().await = None;
                    record_catalog_gauges(&pending.catalog);
                    return Ok(());
                }
                Err(e) if attempt < self.opts.save_retries => {
                    attempt += 1;
                    warn!(target: "sync", error = ?e, attempt, "save failed; retrying");
                    tokio::time::sleep(self.opts.save_backoff * attempt).await;
                }
                Err(e) => {
                    *self.pending.lock().await = Some(pending);
                    return Err(SyncError::persistence(e));
                }
            }
        }
    }

    async fn try_commit(&self, p: &mut PendingCommit) -> anyhow::Result<()> {
        if !p.catalog_saved {
            self.store.save_catalog(&p.catalog).await?;
            p.catalog_saved = true;
        }
        if !p.fresh.is_empty() {
            let _log = self.log_lock.lock().await;
            let log = self.store.load_notifications().await?;
            let merged = notify::prepend(p.fresh.clone(), log);
            self.store.save_notifications(&merged).await?;
            counter!("notifications_emitted_total").increment(p.fresh.len() as u64);
            p.fresh.clear();
        }
        Ok(())
    }

    /// Re-attempt a parked commit without fetching again.
    /// Returns `Ok(false)` when nothing was pending.
    pub async fn retry_save(&self) -> SyncResult<bool> {
        let Some(_ticket) = self.guard.try_begin() else {
            return Err(SyncError::Busy);
        };
        let Some(pending) = self.pending.lock().await.take() else {
            return Ok(false);
        };
        let result = self.commit(pending).await;
        let mut inner = self.status_lock();
        match result {
            Ok(()) => {
                inner.last_error = None;
                inner.last_sync_time = Some(self.now());
                info!(target: "sync", "pending commit saved");
                Ok(true)
            }
            Err(e) => {
                inner.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Administrative import. Shares the single-flight guard with runs so a
    /// concurrent run cannot overwrite the import.
    pub async fn import_event(
        &self,
        id: &str,
        imported_by: &str,
        notes: Option<String>,
    ) -> SyncResult<EventRecord> {
        let Some(_ticket) = self.guard.try_begin() else {
            return Err(SyncError::Busy);
        };
        let mut pending = self.pending.lock().await;
        let catalog = match pending.as_ref() {
            Some(p) => p.catalog.clone(),
            None => self.load_catalog_or_seed().await?,
        };
        let next = admin::mark_imported(&catalog, id, imported_by, notes, self.now())?;
        self.store
            .save_catalog(&next)
            .await
            .map_err(SyncError::persistence)?;
        // The import also persisted the parked catalog.
        if let Some(p) = pending.as_mut() {
            p.catalog = next.clone();
            p.catalog_saved = true;
        }
        if pending.as_ref().is_some_and(|p| p.fresh.is_empty()) {
            *pending = None;
        }
        drop(pending);
        info!(target: "sync", id, imported_by, "event imported");
        next.into_iter()
            .find(|e| e.id == id)
            .ok_or_else(|| SyncError::NotFound(id.to_string()))
    }

    /// Mark one notification read. Returns `NotFound` for an unknown id.
    pub async fn mark_notification_read(&self, id: &str) -> SyncResult<()> {
        let _log = self.log_lock.lock().await;
        let mut log = self
            .store
            .load_notifications()
            .await
            .map_err(SyncError::persistence)?;
        if !notify::mark_read(&mut log, id) {
            return Err(SyncError::NotFound(id.to_string()));
        }
        self.store
            .save_notifications(&log)
            .await
            .map_err(SyncError::persistence)
    }
}

/// (created, newly updated, newly inactive) between two catalogs.
fn transitions(old: &[EventRecord], new: &[EventRecord]) -> (usize, usize, usize) {
    let before: HashMap<&str, EventStatus> =
        old.iter().map(|r| (r.id.as_str(), r.status)).collect();
    let mut created = 0;
    let mut updated = 0;
    let mut deactivated = 0;
    for r in new {
        match before.get(r.id.as_str()) {
            None => created += 1,
            Some(prev) if *prev != r.status => match r.status {
                EventStatus::Updated => updated += 1,
                EventStatus::Inactive => deactivated += 1,
                _ => {}
            },
            Some(_) => {}
        }
    }
    (created, updated, deactivated)
}

fn record_catalog_gauges(catalog: &[EventRecord]) {
    for status in EventStatus::ALL {
        let n = catalog.iter().filter(|e| e.status == status).count();
        gauge!("catalog_records", "status" => status.as_str()).set(n as f64);
    }
}
