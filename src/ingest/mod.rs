// src/ingest/mod.rs
pub mod providers;
pub mod scheduler;
pub mod types;

use crate::error::SyncError;
use crate::ingest::types::{EventSource, RawCandidate};
use crate::model::IncomingItem;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "ingest_candidates_total",
            "Candidates returned by the event source."
        );
        describe_counter!(
            "ingest_dropped_total",
            "Candidates dropped because a required field was missing."
        );
        describe_counter!("ingest_source_errors_total", "Event source fetch errors.");
        describe_histogram!("ingest_fetch_ms", "Event source fetch time in milliseconds.");
        describe_counter!("sync_runs_total", "Completed reconciliation runs.");
        describe_counter!(
            "sync_skipped_total",
            "Runs skipped because the source returned nothing usable."
        );
        describe_counter!("sync_failures_total", "Failed runs, by error kind.");
        describe_counter!("sync_busy_total", "Triggers rejected by the single-flight guard.");
        describe_counter!(
            "notifications_emitted_total",
            "Notifications appended to the log."
        );
        describe_gauge!("catalog_records", "Catalog size by status after the last run.");
        describe_gauge!("sync_last_run_ts", "Unix ts of the last committed run.");
    });
}

/// Normalize text: decode entities, strip tags, collapse whitespace, trim.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out.trim().to_string()
}

fn field(v: Option<String>) -> String {
    v.as_deref().map(normalize_text).unwrap_or_default()
}

fn required(
    title: &str,
    name: &'static str,
    v: Option<String>,
) -> Result<String, SyncError> {
    let s = field(v);
    if s.is_empty() {
        return Err(SyncError::Validation {
            title: title.to_string(),
            field: name,
        });
    }
    Ok(s)
}

/// Turn a raw candidate into an `IncomingItem`.
/// Required: title, dateTime, venueName, city, description, originalUrl.
pub fn validate_candidate(raw: RawCandidate) -> Result<IncomingItem, SyncError> {
    let title = required("<untitled>", "title", raw.title)?;
    Ok(IncomingItem {
        date_time: required(&title, "dateTime", raw.date_time)?,
        venue_name: required(&title, "venueName", raw.venue_name)?,
        city: required(&title, "city", raw.city)?,
        description: required(&title, "description", raw.description)?,
        original_url: required(&title, "originalUrl", raw.original_url)?,
        venue_address: field(raw.venue_address),
        category: field(raw.category),
        image_url: field(raw.image_url),
        source_name: field(raw.source_name),
        title,
    })
}

/// Validate a whole batch. Malformed candidates are logged and dropped;
/// returns (kept, dropped_count).
pub fn validate_batch(raw: Vec<RawCandidate>) -> (Vec<IncomingItem>, usize) {
    let mut kept = Vec::with_capacity(raw.len());
    let mut dropped = 0usize;
    for cand in raw {
        match validate_candidate(cand) {
            Ok(item) => kept.push(item),
            Err(e) => {
                dropped += 1;
                tracing::warn!(target: "ingest", error = %e, "dropping malformed candidate");
            }
        }
    }
    (kept, dropped)
}

/// Fetch once from `source` and validate.
/// Returns (kept, dropped_count); a fetch error is `SourceUnavailable`.
pub async fn fetch_validated(
    source: &dyn EventSource,
    city: &str,
) -> Result<(Vec<IncomingItem>, usize), SyncError> {
    ensure_metrics_described();

    let t0 = std::time::Instant::now();
    let raw = match source.fetch_candidates(city).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(target: "ingest", error = ?e, source = source.name(), "source error");
            counter!("ingest_source_errors_total").increment(1);
            return Err(SyncError::source(e));
        }
    };
    histogram!("ingest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    counter!("ingest_candidates_total").increment(raw.len() as u64);

    let (kept, dropped) = validate_batch(raw);
    counter!("ingest_dropped_total").increment(dropped as u64);
    Ok((kept, dropped))
}
