//! Counting semaphore with cancellable acquire

use std::sync::Arc;

use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;

use crate::errors::AgentError;

#[derive(Debug, Clone)]
pub struct Semaphore {
    inner: Arc<tokio::sync::Semaphore>,
    capacity: usize,
}

/// A held slot. Dropping it releases the slot.
#[derive(Debug)]
pub struct Permit {
    _permit: OwnedSemaphorePermit,
}

impl Permit {
    pub fn release(self) {}
}

impl Semaphore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(tokio::sync::Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.inner.available_permits()
    }

    /// Wait for a free slot, giving up when `cancel` fires
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Permit, AgentError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AgentError::Cancelled("waiting for a deployment slot".to_string())),
            permit = self.inner.clone().acquire_owned() => permit
                .map(|p| Permit { _permit: p })
                .map_err(|e| AgentError::Internal(format!("semaphore closed: {}", e))),
        }
    }

    pub fn try_acquire(&self) -> Option<Permit> {
        self.inner
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|p| Permit { _permit: p })
    }
}
