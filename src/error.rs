//! Error taxonomy for the sync pipeline and admin actions.
//! The reconciler and the notification deriver are total and never return
//! these; everything here belongs to their callers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// A candidate from the source is missing a required field.
    #[error("invalid candidate '{title}': missing {field}")]
    Validation { title: String, field: &'static str },

    /// Fetch failed, timed out, or the source is not configured.
    #[error("event source unavailable: {0}")]
    SourceUnavailable(String),

    /// Storage read or write failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A run is already in flight.
    #[error("a sync run is already in progress")]
    Busy,

    #[error("no event with id {0}")]
    NotFound(String),
}

impl SyncError {
    /// Short label used as a metrics dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Validation { .. } => "validation",
            SyncError::SourceUnavailable(_) => "source_unavailable",
            SyncError::Persistence(_) => "persistence",
            SyncError::Busy => "busy",
            SyncError::NotFound(_) => "not_found",
        }
    }

    pub fn persistence(err: anyhow::Error) -> Self {
        SyncError::Persistence(format!("{err:#}"))
    }

    pub fn source(err: anyhow::Error) -> Self {
        SyncError::SourceUnavailable(format!("{err:#}"))
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
