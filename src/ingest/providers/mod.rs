pub mod fixture;
pub mod gemini;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::SyncConfig;
use crate::ingest::types::{EventSource, RawCandidate};

use self::fixture::FixtureSource;
use self::gemini::{GeminiClient, GeminiSource};

pub type DynEventSource = Arc<dyn EventSource>;

/// Candidates served in mock mode.
pub const MOCK_FIXTURE: &str = include_str!("../../../config/mock_candidates.json");

/// Always fails; used when no API key is configured.
pub struct DisabledSource;

#[async_trait]
impl EventSource for DisabledSource {
    async fn fetch_candidates(&self, _city: &str) -> Result<Vec<RawCandidate>> {
        bail!("event source disabled (no GEMINI_API_KEY)")
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Factory: build the event source according to config and environment.
///
/// * If `AI_TEST_MODE=mock`, returns the fixture source.
/// * Else if no API key is configured, returns a disabled source.
/// * Else builds the Gemini source.
pub fn build_event_source(cfg: &SyncConfig) -> Result<DynEventSource> {
    if std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Ok(Arc::new(FixtureSource::from_json(MOCK_FIXTURE)?));
    }
    match build_gemini_client(cfg)? {
        Some(client) => Ok(Arc::new(GeminiSource::new(client))),
        None => {
            tracing::warn!("GEMINI_API_KEY missing; event source disabled");
            Ok(Arc::new(DisabledSource))
        }
    }
}

/// `None` when no API key is configured.
pub fn build_gemini_client(cfg: &SyncConfig) -> Result<Option<GeminiClient>> {
    let Some(key) = cfg.api_key.clone().filter(|k| !k.trim().is_empty()) else {
        return Ok(None);
    };
    let client = GeminiClient::new(
        key,
        Some(cfg.model.as_str()),
        Duration::from_secs(cfg.fetch_timeout_secs),
    )?;
    Ok(Some(client))
}
