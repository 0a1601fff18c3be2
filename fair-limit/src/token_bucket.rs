use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::LimitError;
use crate::RateLimiter;
use crate::gate::AdmissionGate;
use crate::request::PendingRequest;
use crate::scheduler::Scheduler;
use crate::scheduler::cadence;

/// A token bucket that grants variable-sized quota in strict arrival order.
///
/// A dedicated scheduler task refills the bucket every [`interval`](Self::interval)
/// and serves waiting callers head-first, so a large request is never starved
/// by a stream of smaller ones. The price is head-of-line blocking: a small
/// request waits behind a large one that arrived before it.
///
/// The bucket starts empty and never holds more than one second's worth of
/// quota.
#[derive(Debug)]
pub struct TokenBucketRateLimiter {
    limit: usize,
    interval: Duration,
    token: usize,
    gate: AdmissionGate,
    requests: mpsc::Sender<Arc<PendingRequest>>,
    stop: CancellationToken,
    stopped: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TokenBucketRateLimiter {
    /// Creates a limiter granting `limit` units per second.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime, since the scheduler is
    /// spawned onto the current one. See [`try_new`](Self::try_new).
    pub fn new(limit: NonZeroUsize) -> Self {
        let limit = limit.get();
        let (interval, token) = cadence(limit);
        let gate = AdmissionGate::new(token);
        // The closest tokio gets to a rendezvous: a sender only proceeds once
        // the scheduler has taken the previous request.
        let (requests, rx) = mpsc::channel(1);
        let stop = CancellationToken::new();
        let stopped = CancellationToken::new();

        let scheduler = Scheduler::new(limit, interval, token, rx, stop.clone(), stopped.clone());
        let worker = tokio::spawn(scheduler.run());

        Self {
            limit,
            interval,
            token,
            gate,
            requests,
            stop,
            stopped,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Like [`new`](Self::new), but rejects a zero limit and a missing runtime
    /// instead of panicking.
    pub fn try_new(limit: usize) -> Result<Self, LimitError> {
        let limit = NonZeroUsize::new(limit).ok_or(LimitError::InvalidLimit)?;
        tokio::runtime::Handle::try_current().map_err(|_| LimitError::NoRuntime)?;
        Ok(Self::new(limit))
    }

    /// Units granted per second.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Replenishment period.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Units added to the bucket every interval.
    pub fn token(&self) -> usize {
        self.token
    }

    /// How many callers may be registered with the scheduler at once.
    pub fn concurrency(&self) -> usize {
        self.gate.capacity()
    }

    async fn acquire(&self, cancel: &CancellationToken, size: usize) -> Result<(), LimitError> {
        if size == 0 {
            return Ok(());
        }
        if size > self.limit {
            return Err(LimitError::Unsatisfiable {
                size,
                limit: self.limit,
            });
        }

        let _permit = self.gate.enter(cancel).await?;

        // Dropping this future part way through counts as cancellation, so the
        // scheduler reclaims the queued entry instead of charging for it.
        let cancel = cancel.child_token();
        let _abandon = cancel.clone().drop_guard();
        let (req, done) = PendingRequest::new(size, cancel.clone());
        let req = Arc::new(req);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LimitError::Cancelled),
            sent = self.requests.send(req.clone()) => {
                if sent.is_err() {
                    // Closed: nothing will ever grant this request.
                    cancel.cancelled().await;
                    return Err(LimitError::Cancelled);
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                if req.is_done() {
                    Ok(())
                } else {
                    trace!(size, "take cancelled while waiting");
                    Err(LimitError::Cancelled)
                }
            }
            granted = done => match granted {
                Ok(()) => Ok(()),
                // The scheduler stopped with this request still queued.
                Err(_) => {
                    cancel.cancelled().await;
                    Err(LimitError::Cancelled)
                }
            },
        }
    }

    async fn shutdown(&self) -> Result<(), LimitError> {
        self.stop.cancel();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(err) = worker.await {
                warn!(%err, "token bucket scheduler did not stop cleanly");
            }
            debug!(limit = self.limit, "token bucket rate limiter closed");
        }
        // Concurrent closers find the worker already taken; they still return
        // only after the stop pass.
        self.stopped.cancelled().await;
        Ok(())
    }
}

impl RateLimiter for TokenBucketRateLimiter {
    fn take<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        size: usize,
    ) -> BoxFuture<'a, Result<(), LimitError>> {
        Box::pin(self.acquire(cancel, size))
    }

    fn close(&self) -> BoxFuture<'_, Result<(), LimitError>> {
        Box::pin(self.shutdown())
    }
}

impl Drop for TokenBucketRateLimiter {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
