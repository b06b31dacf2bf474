// tests/sync_runner.rs
//
// End-to-end runs of SyncRunner over MemoryStore + FixtureSource.
//
// Covered:
// - first run against the seed (create / keep / deactivate / imported untouched)
// - repeat run is idempotent and emits no duplicate notifications
// - source failure leaves catalog and log untouched
// - empty batch is skipped
// - save failure parks the commit; retry_save writes it without refetching
// - overlapping triggers are rejected with Busy
// - unsaved notifications survive later runs and repeated save failures
// - read-marks and commits on the notification log do not drop each other
// - allow_empty_batch deactivates everything not imported
// - venue/date/title matching through the runner

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use event_sync::ingest::providers::fixture::FixtureSource;
use event_sync::ingest::types::{EventSource, RawCandidate};
use event_sync::model::{
    seed_catalog, EventRecord, EventStatus, NotificationEvent, TicketLead, UserPreferences,
};
use event_sync::reconcile::VenueDateTitleKey;
use event_sync::store::{MemoryStore, Store};
use event_sync::sync::{RunOutcome, RunnerOptions, SyncRunner, SyncState, Trigger};
use event_sync::SyncError;

const MOCK: &str = include_str!("../config/mock_candidates.json");

fn fixed_clock() -> event_sync::sync::Clock {
    Arc::new(|| Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap())
}

fn fast_opts() -> RunnerOptions {
    RunnerOptions {
        fetch_timeout: Duration::from_secs(2),
        allow_empty_batch: false,
        save_retries: 0,
        save_backoff: Duration::from_millis(1),
    }
}

fn setup(source: Arc<FixtureSource>) -> (Arc<MemoryStore>, SyncRunner) {
    let store = Arc::new(MemoryStore::with_catalog(seed_catalog().unwrap()));
    let runner = SyncRunner::new(store.clone(), source, fast_opts()).with_clock(fixed_clock());
    (store, runner)
}

async fn subscribe(store: &MemoryStore, cats: &[&str]) {
    store
        .save_preferences(&UserPreferences {
            categories: cats.iter().map(|c| c.to_string()).collect(),
            last_notification_check: Utc::now(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn first_run_reconciles_seed_against_mock_batch() {
    let source = Arc::new(FixtureSource::from_json(MOCK).unwrap());
    let (store, runner) = setup(source);
    subscribe(&store, &["Culture", "Music"]).await;

    let report = runner.run_once("Sydney", Trigger::Manual).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Committed);
    assert_eq!(report.fetched, 3);
    assert_eq!(report.created, 2);
    assert_eq!(report.deactivated, 1);
    assert_eq!(report.catalog_size, 5);

    let catalog = store.load_catalog().await.unwrap();
    let by_title = |t: &str| catalog.iter().find(|e| e.title == t).unwrap();

    let opera = by_title("Sydney Opera House Sunset Tour");
    assert_eq!(opera.status, EventStatus::Imported);
    assert_eq!(opera.imported_by.as_deref(), Some("System Admin"));

    let bondi = by_title("Bondi Beach Surf Competition");
    assert_eq!(bondi.id, "2");
    assert_eq!(bondi.status, EventStatus::New);
    assert_eq!(bondi.last_scraped_time, fixed_clock()());

    assert_eq!(
        by_title("Darling Harbour Fireworks").status,
        EventStatus::Inactive
    );
    assert_eq!(by_title("Vivid Sydney Light Walk").status, EventStatus::New);

    let log = store.load_notifications().await.unwrap();
    let messages: Vec<_> = log.iter().map(|n| n.message.as_str()).collect();
    assert_eq!(
        messages,
        vec![
            "New event: Vivid Sydney Light Walk",
            "New event: City Recital Hall Jazz Night"
        ]
    );
    assert!(log.iter().all(|n| !n.read));

    let status = runner.status().await;
    assert_eq!(status.state, SyncState::Idle);
    assert_eq!(status.last_sync_time, Some(fixed_clock()()));
    assert!(status.last_error.is_none());
}

#[tokio::test]
async fn repeat_run_is_idempotent_without_duplicate_notifications() {
    let source = Arc::new(FixtureSource::from_json(MOCK).unwrap());
    let (store, runner) = setup(source);
    subscribe(&store, &["Culture", "Music", "Sports"]).await;

    runner.run_once("Sydney", Trigger::Manual).await.unwrap();
    let catalog_1 = store.load_catalog().await.unwrap();
    let log_1 = store.load_notifications().await.unwrap();

    let report = runner.run_once("Sydney", Trigger::Scheduled).await.unwrap();
    assert_eq!(report.created, 0);
    assert_eq!(report.notifications, 0);

    let catalog_2 = store.load_catalog().await.unwrap();
    assert_eq!(catalog_1, catalog_2);
    assert_eq!(store.load_notifications().await.unwrap(), log_1);
}

#[tokio::test]
async fn no_subscriptions_means_no_notifications() {
    let source = Arc::new(FixtureSource::from_json(MOCK).unwrap());
    let (store, runner) = setup(source);

    let report = runner.run_once("Sydney", Trigger::Manual).await.unwrap();
    assert_eq!(report.created, 2);
    assert_eq!(report.notifications, 0);
    assert!(store.load_notifications().await.unwrap().is_empty());
}

#[tokio::test]
async fn source_failure_leaves_state_untouched() {
    let source = Arc::new(FixtureSource::from_json(MOCK).unwrap());
    source.push_failure("upstream 500");
    let (store, runner) = setup(source);
    subscribe(&store, &["Culture"]).await;

    let err = runner.run_once("Sydney", Trigger::Manual).await.unwrap_err();
    assert!(matches!(err, SyncError::SourceUnavailable(_)), "{err:?}");
    assert_eq!(store.load_catalog().await.unwrap(), seed_catalog().unwrap());
    assert!(store.load_notifications().await.unwrap().is_empty());

    let status = runner.status().await;
    assert_eq!(status.state, SyncState::Idle);
    assert!(status.last_error.is_some());
    assert!(status.last_sync_time.is_none());
}

#[tokio::test]
async fn empty_batch_is_skipped() {
    let source = Arc::new(FixtureSource::from_json(MOCK).unwrap());
    source.push_batch(vec![]);
    let (store, runner) = setup(source);

    let report = runner.run_once("Sydney", Trigger::Manual).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Skipped);
    assert_eq!(store.load_catalog().await.unwrap(), seed_catalog().unwrap());
}

#[tokio::test]
async fn invalid_candidates_are_dropped_and_counted() {
    let source = Arc::new(FixtureSource::from_json(MOCK).unwrap());
    source.push_batch(vec![RawCandidate {
        title: Some("No venue".into()),
        ..Default::default()
    }]);
    let (store, runner) = setup(source);

    // Only invalid items: treated like an empty batch.
    let report = runner.run_once("Sydney", Trigger::Manual).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Skipped);
    assert_eq!(report.dropped, 1);
    assert_eq!(store.load_catalog().await.unwrap().len(), 3);
}

#[tokio::test]
async fn save_failure_parks_commit_until_retry() {
    let source = Arc::new(FixtureSource::from_json(MOCK).unwrap());
    let (store, runner) = setup(source.clone());
    subscribe(&store, &["Music"]).await;
    store.set_fail_writes(true);

    let err = runner.run_once("Sydney", Trigger::Manual).await.unwrap_err();
    assert!(matches!(err, SyncError::Persistence(_)), "{err:?}");
    assert!(runner.status().await.pending_commit);
    assert_eq!(store.load_catalog().await.unwrap(), seed_catalog().unwrap());

    // A failing source proves retry does not refetch.
    source.push_failure("would be fatal if fetched");
    store.set_fail_writes(false);
    assert!(runner.retry_save().await.unwrap());
    assert!(!runner.status().await.pending_commit);
    assert_eq!(store.load_catalog().await.unwrap().len(), 5);
    assert_eq!(store.load_notifications().await.unwrap().len(), 1);

    assert!(!runner.retry_save().await.unwrap());
}

struct SlowSource;

#[async_trait::async_trait]
impl EventSource for SlowSource {
    async fn fetch_candidates(&self, _city: &str) -> anyhow::Result<Vec<RawCandidate>> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(vec![])
    }
    fn name(&self) -> &'static str {
        "slow"
    }
}

#[tokio::test]
async fn overlapping_trigger_is_busy() {
    let store = Arc::new(MemoryStore::with_catalog(seed_catalog().unwrap()));
    let runner = Arc::new(SyncRunner::new(store, Arc::new(SlowSource), fast_opts()));

    let r1 = runner.clone();
    let first = tokio::spawn(async move { r1.run_once("Sydney", Trigger::Scheduled).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(runner.status().await.state, SyncState::Running);
    let err = runner.run_once("Sydney", Trigger::Manual).await.unwrap_err();
    assert!(matches!(err, SyncError::Busy));
    let err = runner.import_event("2", "Admin", None).await.unwrap_err();
    assert!(matches!(err, SyncError::Busy));

    let report = first.await.unwrap().unwrap();
    assert_eq!(report.outcome, RunOutcome::Skipped);
    assert_eq!(runner.status().await.state, SyncState::Idle);
}

#[tokio::test]
async fn fetch_timeout_is_source_unavailable() {
    let store = Arc::new(MemoryStore::with_catalog(seed_catalog().unwrap()));
    let opts = RunnerOptions {
        fetch_timeout: Duration::from_millis(20),
        ..fast_opts()
    };
    let runner = SyncRunner::new(store, Arc::new(SlowSource), opts);
    let err = runner.run_once("Sydney", Trigger::Manual).await.unwrap_err();
    assert!(matches!(err, SyncError::SourceUnavailable(_)));
}

#[tokio::test]
async fn import_survives_later_runs() {
    let source = Arc::new(FixtureSource::from_json(MOCK).unwrap());
    let (store, runner) = setup(source);

    let rec = runner
        .import_event("2", "Dana", Some("  front page  ".into()))
        .await
        .unwrap();
    assert_eq!(rec.status, EventStatus::Imported);
    assert_eq!(rec.import_notes.as_deref(), Some("front page"));

    runner.run_once("Sydney", Trigger::Manual).await.unwrap();
    let after = store.load_catalog().await.unwrap();
    let bondi = after.iter().find(|e| e.id == "2").unwrap();
    assert_eq!(bondi.status, EventStatus::Imported);
    assert_eq!(bondi.imported_by.as_deref(), Some("Dana"));

    let err = runner.import_event("nope", "Dana", None).await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
}

/// Delegates to a MemoryStore; can fail notification-log writes only and
/// slow down log reads to widen race windows.
struct LogFaultStore {
    inner: MemoryStore,
    fail_log_writes: AtomicBool,
    slow_log_reads: bool,
}

impl LogFaultStore {
    fn new(slow_log_reads: bool) -> Self {
        Self {
            inner: MemoryStore::with_catalog(seed_catalog().unwrap()),
            fail_log_writes: AtomicBool::new(false),
            slow_log_reads,
        }
    }
}

#[async_trait::async_trait]
impl Store for LogFaultStore {
    async fn load_catalog(&self) -> anyhow::Result<Vec<EventRecord>> {
        self.inner.load_catalog().await
    }
    async fn save_catalog(&self, catalog: &[EventRecord]) -> anyhow::Result<()> {
        self.inner.save_catalog(catalog).await
    }
    async fn load_notifications(&self) -> anyhow::Result<Vec<NotificationEvent>> {
        if self.slow_log_reads {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.inner.load_notifications().await
    }
    async fn save_notifications(&self, log: &[NotificationEvent]) -> anyhow::Result<()> {
        if self.fail_log_writes.load(Ordering::SeqCst) {
            anyhow::bail!("disk full");
        }
        self.inner.save_notifications(log).await
    }
    async fn load_preferences(&self) -> anyhow::Result<UserPreferences> {
        self.inner.load_preferences().await
    }
    async fn save_preferences(&self, prefs: &UserPreferences) -> anyhow::Result<()> {
        self.inner.save_preferences(prefs).await
    }
    async fn load_leads(&self) -> anyhow::Result<Vec<TicketLead>> {
        self.inner.load_leads().await
    }
    async fn save_lead(&self, lead: &TicketLead) -> anyhow::Result<()> {
        self.inner.save_lead(lead).await
    }
}

fn messages(log: &[NotificationEvent]) -> Vec<&str> {
    log.iter().map(|n| n.message.as_str()).collect()
}

#[tokio::test]
async fn unsaved_notifications_are_written_by_next_run() {
    let store = Arc::new(LogFaultStore::new(false));
    subscribe(&store.inner, &["Culture", "Music"]).await;
    let source = Arc::new(FixtureSource::from_json(MOCK).unwrap());
    let runner = SyncRunner::new(store.clone(), source, fast_opts()).with_clock(fixed_clock());

    store.fail_log_writes.store(true, Ordering::SeqCst);
    let err = runner.run_once("Sydney", Trigger::Manual).await.unwrap_err();
    assert!(matches!(err, SyncError::Persistence(_)), "{err:?}");
    assert!(runner.status().await.pending_commit);
    // Catalog landed, log did not.
    assert_eq!(store.load_catalog().await.unwrap().len(), 5);
    assert!(store.load_notifications().await.unwrap().is_empty());

    store.fail_log_writes.store(false, Ordering::SeqCst);
    let report = runner.run_once("Sydney", Trigger::Scheduled).await.unwrap();
    assert_eq!(report.notifications, 2);
    assert!(!runner.status().await.pending_commit);
    assert_eq!(
        messages(&store.load_notifications().await.unwrap()),
        vec![
            "New event: Vivid Sydney Light Walk",
            "New event: City Recital Hall Jazz Night"
        ]
    );
}

#[tokio::test]
async fn repeated_save_failures_keep_one_copy_of_unsaved_notifications() {
    let store = Arc::new(LogFaultStore::new(false));
    subscribe(&store.inner, &["Music"]).await;
    let source = Arc::new(FixtureSource::from_json(MOCK).unwrap());
    let runner = SyncRunner::new(store.clone(), source, fast_opts()).with_clock(fixed_clock());

    store.fail_log_writes.store(true, Ordering::SeqCst);
    assert!(runner.run_once("Sydney", Trigger::Manual).await.is_err());
    assert!(runner.run_once("Sydney", Trigger::Manual).await.is_err());

    store.fail_log_writes.store(false, Ordering::SeqCst);
    assert!(runner.retry_save().await.unwrap());
    assert_eq!(
        messages(&store.load_notifications().await.unwrap()),
        vec!["New event: City Recital Hall Jazz Night"]
    );
}

#[tokio::test]
async fn read_mark_during_commit_keeps_both_changes() {
    let store = Arc::new(LogFaultStore::new(true));
    subscribe(&store.inner, &["Music"]).await;
    store
        .inner
        .save_notifications(&[NotificationEvent {
            id: "n0".into(),
            message: "New event: Bondi Beach Surf Competition".into(),
            event_id: "2".into(),
            timestamp: Utc::now(),
            read: false,
        }])
        .await
        .unwrap();
    let source = Arc::new(FixtureSource::from_json(MOCK).unwrap());
    let runner = SyncRunner::new(store.clone(), source, fast_opts()).with_clock(fixed_clock());

    let (marked, run) = tokio::join!(
        runner.mark_notification_read("n0"),
        runner.run_once("Sydney", Trigger::Manual)
    );
    marked.unwrap();
    run.unwrap();

    let log = store.load_notifications().await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].message, "New event: City Recital Hall Jazz Night");
    assert!(!log[0].read);
    assert_eq!(log[1].id, "n0");
    assert!(log[1].read);
}

#[tokio::test]
async fn allowed_empty_batch_deactivates_all_but_imported() {
    let source = Arc::new(FixtureSource::from_json(MOCK).unwrap());
    source.push_batch(vec![]);
    let store = Arc::new(MemoryStore::with_catalog(seed_catalog().unwrap()));
    let opts = RunnerOptions {
        allow_empty_batch: true,
        ..fast_opts()
    };
    let runner = SyncRunner::new(store.clone(), source, opts).with_clock(fixed_clock());

    let report = runner.run_once("Sydney", Trigger::Manual).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Committed);
    assert_eq!(report.deactivated, 2);
    assert_eq!(report.created, 0);

    let catalog = store.load_catalog().await.unwrap();
    let status_of = |id: &str| catalog.iter().find(|e| e.id == id).unwrap().status;
    assert_eq!(status_of("1"), EventStatus::Imported);
    assert_eq!(status_of("2"), EventStatus::Inactive);
    assert_eq!(status_of("3"), EventStatus::Inactive);
}

fn bondi_retitled() -> RawCandidate {
    RawCandidate {
        title: Some("  BONDI beach surf   competition".into()),
        date_time: Some("2024-06-20T09:30:00Z".into()),
        venue_name: Some("Bondi Beach".into()),
        city: Some("Sydney".into()),
        description: Some("The annual surf championship returns to the iconic Bondi Beach.".into()),
        category: Some("Sports".into()),
        original_url: Some("https://www.surfingnsw.com.au".into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn venue_date_title_key_tracks_retitled_event() {
    let source = Arc::new(FixtureSource::from_json(MOCK).unwrap());
    source.push_batch(vec![bondi_retitled()]);
    let store = Arc::new(MemoryStore::with_catalog(seed_catalog().unwrap()));
    let runner = SyncRunner::new(store.clone(), source, fast_opts())
        .with_clock(fixed_clock())
        .with_match_key(VenueDateTitleKey);

    let report = runner.run_once("Sydney", Trigger::Manual).await.unwrap();
    assert_eq!(report.created, 0);
    assert_eq!(report.updated, 1);

    let catalog = store.load_catalog().await.unwrap();
    assert_eq!(catalog.len(), 3);
    let bondi = catalog.iter().find(|e| e.id == "2").unwrap();
    assert_eq!(bondi.status, EventStatus::Updated);
    assert_eq!(bondi.date_time, "2024-06-20T09:30:00Z");
}

#[tokio::test]
async fn title_key_treats_retitled_event_as_new() {
    let source = Arc::new(FixtureSource::from_json(MOCK).unwrap());
    source.push_batch(vec![bondi_retitled()]);
    let store = Arc::new(MemoryStore::with_catalog(seed_catalog().unwrap()));
    let runner = SyncRunner::new(store.clone(), source, fast_opts()).with_clock(fixed_clock());

    let report = runner.run_once("Sydney", Trigger::Manual).await.unwrap();
    assert_eq!(report.created, 1);
    let catalog = store.load_catalog().await.unwrap();
    assert_eq!(catalog.len(), 4);
    assert_eq!(
        catalog.iter().find(|e| e.id == "2").unwrap().status,
        EventStatus::Inactive
    );
}
