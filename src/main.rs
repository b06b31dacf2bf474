//! Event sync service binary entrypoint.
//! Boots tracing, the store, the sync runner with its scheduler, and the Axum router.

use std::sync::Arc;

use event_sync::{
    api::{self, AppState},
    config::SyncConfig,
    ingest::{
        providers::{build_event_source, build_gemini_client},
        scheduler::{spawn_sync_scheduler, SyncSchedulerCfg},
    },
    metrics::Metrics,
    store::{JsonFileStore, Store},
    sync::{RunnerOptions, SyncRunner},
};
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// `RUST_LOG` wins; otherwise info for this crate and warn elsewhere.
/// `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("event_sync=info,warn"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    // Shuttle may have installed a subscriber already.
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = SyncConfig::load_default()?;
    tracing::info!(
        city = %cfg.city,
        interval_secs = cfg.interval_secs,
        data_dir = %cfg.data_dir.display(),
        "config loaded"
    );

    let store: Arc<dyn Store> = Arc::new(JsonFileStore::new(cfg.data_dir.clone()));
    let source = build_event_source(&cfg)?;
    let ai = build_gemini_client(&cfg)?;
    let runner = Arc::new(SyncRunner::new(store, source, RunnerOptions::from(&cfg)));

    spawn_sync_scheduler(
        SyncSchedulerCfg {
            interval_secs: cfg.interval_secs,
            city: cfg.city.clone(),
        },
        runner.clone(),
    );

    let state = AppState {
        runner,
        ai,
        city: cfg.city.clone(),
    };
    let mut router = api::router(state);
    match Metrics::init() {
        Ok(m) => router = router.merge(m.router()),
        Err(e) => tracing::warn!(error = ?e, "metrics endpoint disabled"),
    }

    Ok(router.into())
}
