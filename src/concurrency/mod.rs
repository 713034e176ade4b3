//! Concurrency gate shared by every fan-out point of a sync run
//!
//! A single [`ConcurrencyGate`] is built per run with the configured ceiling and
//! cloned into the scheduler and every task. Task bodies, tag fan-out,
//! child-manifest processing and blob transfers all draw their slots from the
//! same semaphore, so one task cannot monopolise I/O concurrency.
//!
//! A permit is only ever held around leaf I/O. Code holding a permit must not
//! acquire a second one from the same gate, otherwise a ceiling of 1 deadlocks.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Concurrency error types
#[derive(Debug, thiserror::Error)]
pub enum ConcurrencyError {
    #[error("Failed to acquire permit: {0}")]
    PermitAcquisitionFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Bounded-capacity resource gate
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    limit: usize,
    issued: Arc<AtomicU64>,
}

impl ConcurrencyGate {
    pub fn new(limit: usize) -> Result<Self, ConcurrencyError> {
        if limit == 0 {
            return Err(ConcurrencyError::InvalidConfiguration(
                "concurrency ceiling must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
            issued: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Configured ceiling
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots currently held
    pub fn in_flight(&self) -> usize {
        self.limit - self.semaphore.available_permits()
    }

    /// Total permits handed out since the gate was built
    pub fn total_issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }

    /// Wait for a free slot. The slot is released when the permit drops.
    pub async fn acquire(&self) -> Result<ConcurrencyPermit, ConcurrencyError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| ConcurrencyError::PermitAcquisitionFailed(e.to_string()))?;
        self.issued.fetch_add(1, Ordering::Relaxed);
        Ok(ConcurrencyPermit {
            acquired_at: Instant::now(),
            _permit: permit,
        })
    }

    /// Run `operation` while holding one slot
    pub async fn run<F, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: std::future::Future<Output = Result<T, E>>,
        E: From<ConcurrencyError>,
    {
        let _permit = self.acquire().await?;
        operation.await
    }
}

/// Represents one held slot of a [`ConcurrencyGate`]
#[derive(Debug)]
pub struct ConcurrencyPermit {
    /// Timestamp when permit was acquired
    pub acquired_at: Instant,
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyPermit {
    /// Release the slot before the end of scope
    pub fn release(self) {}
}
