// src/ingest/types.rs
use anyhow::Result;

/// A candidate as the AI source returns it: every field may be missing.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RawCandidate {
    pub title: Option<String>,
    pub date_time: Option<String>,
    pub venue_name: Option<String>,
    pub venue_address: Option<String>,
    pub city: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub image_url: Option<String>,
    pub source_name: Option<String>,
    pub original_url: Option<String>,
}

/// Produces candidate events for a city.
///
/// `Ok` with an empty vec means the source answered with nothing; any
/// transport, timeout or decoding failure must be an `Err` so the caller never
/// mistakes a failed fetch for "all events disappeared".
#[async_trait::async_trait]
pub trait EventSource: Send + Sync {
    async fn fetch_candidates(&self, city: &str) -> Result<Vec<RawCandidate>>;
    fn name(&self) -> &'static str;
}
