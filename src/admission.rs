//! Admission controller: bounds the number of writes in flight.
//!
//! A fixed pool of [`AdmissionToken`]s is created up front. Acquisition never
//! waits: when the pool is empty the caller gets [`Busy`] immediately and is
//! expected to degrade its response. A token goes back to the pool when it is
//! dropped, so it must be moved into the task doing the write and released
//! only after that write has finished.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Returned by [`AdmissionController::try_acquire`] when every slot is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("all {capacity} write slots are in use")]
pub struct Busy {
    pub capacity: usize,
}

/// The right to perform one write. Returns to the pool on drop.
#[derive(Debug)]
#[must_use = "dropping the token releases the write slot immediately"]
pub struct AdmissionToken {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionToken {
    /// Return the slot to the pool.
    pub fn release(self) {}
}

/// Counting semaphore sized to the configured maximum of downstream writes.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionController {
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Take a token if one is free, without waiting.
    pub fn try_acquire(&self) -> Result<AdmissionToken, Busy> {
        self.permits
            .clone()
            .try_acquire_owned()
            .map(|permit| AdmissionToken { _permit: permit })
            .map_err(|_| Busy {
                capacity: self.capacity,
            })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tokens currently in the pool.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Tokens currently held by writers.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.available()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
