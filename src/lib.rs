// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod admin;
pub mod api;
pub mod assistant;
pub mod config;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod notify;
pub mod reconcile;
pub mod store;
pub mod sync;

// ---- Re-exports for stable public API ----
pub use crate::admin::mark_imported;
pub use crate::api::router;
pub use crate::error::{SyncError, SyncResult};
pub use crate::notify::derive_notifications;
pub use crate::reconcile::reconcile;
