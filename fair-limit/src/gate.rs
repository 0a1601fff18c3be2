use tokio::sync::Semaphore;
use tokio::sync::SemaphorePermit;
use tokio_util::sync::CancellationToken;

use crate::LimitError;

/// Bounds how many callers may be registered with a scheduler at once.
#[derive(Debug)]
pub(crate) struct AdmissionGate {
    permits: Semaphore,
    capacity: usize,
}

impl AdmissionGate {
    pub(crate) const MAX_CAPACITY: usize = 64;

    /// Sizes the gate from the per-tick grant.
    pub(crate) fn new(token: usize) -> Self {
        let capacity = token.clamp(1, Self::MAX_CAPACITY);
        Self {
            permits: Semaphore::new(capacity),
            capacity,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }

    /// Waits for a slot, giving up when `cancel` fires.
    ///
    /// The slot is released when the returned permit is dropped.
    pub(crate) async fn enter(
        &self,
        cancel: &CancellationToken,
    ) -> Result<SemaphorePermit<'_>, LimitError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LimitError::Cancelled),
            permit = self.permits.acquire() => match permit {
                Ok(permit) => Ok(permit),
                // The semaphore is never closed, but if it were the caller
                // would still only leave on its own cancellation.
                Err(_) => {
                    cancel.cancelled().await;
                    Err(LimitError::Cancelled)
                }
            },
        }
    }
}
