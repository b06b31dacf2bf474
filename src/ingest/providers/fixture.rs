use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;

use crate::ingest::types::{EventSource, RawCandidate};

/// Serves candidates from an in-memory JSON fixture. Used in mock mode and
/// tests; batches can be queued to script a sequence of runs.
pub struct FixtureSource {
    batches: Mutex<Vec<Result<Vec<RawCandidate>, String>>>,
    fallback: Vec<RawCandidate>,
}

impl FixtureSource {
    /// Every fetch returns the same parsed fixture.
    pub fn from_json(s: &str) -> Result<Self> {
        let fallback: Vec<RawCandidate> =
            serde_json::from_str(s).context("parsing candidate fixture")?;
        Ok(Self {
            batches: Mutex::new(Vec::new()),
            fallback,
        })
    }

    pub fn from_candidates(fallback: Vec<RawCandidate>) -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            fallback,
        }
    }

    /// Queue a one-shot batch served before the fallback.
    pub fn push_batch(&self, batch: Vec<RawCandidate>) {
        self.lock().push(Ok(batch));
    }

    /// Queue a one-shot failure.
    pub fn push_failure(&self, reason: &str) {
        self.lock().push(Err(reason.to_string()));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Result<Vec<RawCandidate>, String>>> {
        // A poisoned queue only means a test panicked mid-push; the data is still usable.
        self.batches.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl EventSource for FixtureSource {
    async fn fetch_candidates(&self, _city: &str) -> Result<Vec<RawCandidate>> {
        let next = {
            let mut q = self.lock();
            if q.is_empty() {
                None
            } else {
                Some(q.remove(0))
            }
        };
        match next {
            Some(Ok(batch)) => Ok(batch),
            Some(Err(reason)) => Err(anyhow!(reason)),
            None => Ok(self.fallback.clone()),
        }
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}
