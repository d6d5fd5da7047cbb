//! Cross-run concurrency gate
//!
//! With concurrent builds disabled, a single-permit semaphore is the only
//! point where runs of one pipeline exclude each other. The permit is held
//! for the whole Running phase.

use crate::pipeline::{ConcurrencyPolicy, PipelineError, PipelineOptions};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Admission to the Running state
#[derive(Debug)]
pub struct Admission {
    _permit: Option<OwnedSemaphorePermit>,
}

/// Admits runs according to the pipeline's concurrency options
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    pipeline: String,
    slot: Option<Arc<Semaphore>>,
    policy: ConcurrencyPolicy,
}

impl ConcurrencyGate {
    /// Creates the gate for a pipeline
    #[must_use]
    pub fn new(pipeline: impl Into<String>, options: &PipelineOptions) -> Self {
        Self {
            pipeline: pipeline.into(),
            slot: options
                .disable_concurrent_builds
                .then(|| Arc::new(Semaphore::new(1))),
            policy: options.concurrency_policy,
        }
    }

    /// Returns true if runs exclude each other
    #[must_use]
    pub fn is_exclusive(&self) -> bool {
        self.slot.is_some()
    }

    /// Waits for (Queue) or tries (Reject) the running slot
    ///
    /// Queued runs are admitted in FIFO order.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ConcurrentRunRejected`] when the policy is
    /// `Reject` and another run holds the slot.
    pub async fn admit(&self) -> Result<Admission, PipelineError> {
        let Some(slot) = &self.slot else {
            return Ok(Admission { _permit: None });
        };

        let permit = match self.policy {
            ConcurrencyPolicy::Queue => Arc::clone(slot).acquire_owned().await.ok(),
            ConcurrencyPolicy::Reject => Arc::clone(slot).try_acquire_owned().ok(),
        };

        match permit {
            Some(permit) => Ok(Admission {
                _permit: Some(permit),
            }),
            None => Err(PipelineError::ConcurrentRunRejected {
                pipeline: self.pipeline.clone(),
            }),
        }
    }
}
