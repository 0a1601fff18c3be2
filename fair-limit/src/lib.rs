//! # fair-limit
//!
//! `fair-limit` grants variable-sized quota to many concurrent callers under a
//! single global rate.
//!
//! ## Core Philosophy
//!
//! Lock-free strategies decide each request on its own, which favours small
//! requests: a caller asking for 1KB keeps squeezing in while a caller asking
//! for 1MB waits for a bucket that never fills. `fair-limit` instead hands every
//! request to one scheduler task that serves them in strict arrival order.
//!
//! ## Key Concepts
//!
//! * **Single Writer**: Only the scheduler task touches the bucket and its
//!   queue, so neither needs a lock.
//! * **Strict FIFO**: A later request is never granted while an earlier one is
//!   still waiting, whatever their sizes.
//! * **Cooperative Cancellation**: Callers stop waiting the moment their
//!   [`CancellationToken`] fires or their future is dropped. The scheduler
//!   reclaims the abandoned entry the next time it reaches it.
//! * **Bounded Memory**: An admission gate caps how many callers are
//!   registered with the scheduler at any time.
//!
//! ## Example
//!
//! ```rust
//! use std::num::NonZeroUsize;
//!
//! use fair_limit::RateLimiter;
//! use fair_limit::TokenBucketRateLimiter;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread", start_paused = true)]
//! # async fn main() {
//! // 200MB per second
//! let limiter = TokenBucketRateLimiter::new(NonZeroUsize::new(200 * (1 << 20)).unwrap());
//! let cancel = CancellationToken::new();
//!
//! // Take 1MB
//! limiter.take(&cancel, 1 << 20).await.unwrap();
//! limiter.close().await.unwrap();
//! # }
//! ```

use std::fmt::Debug;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

mod error;
mod gate;
mod request;
pub mod ring;
mod scheduler;
mod token_bucket;
mod unlimiter;

pub use error::LimitError;
pub use ring::Ring;
pub use token_bucket::TokenBucketRateLimiter;
pub use unlimiter::Unlimiter;

/// Something that hands out quota to callers.
///
/// Implementations must be `Send` and `Sync` so a single limiter can be shared
/// across tasks via `Arc`.
pub trait RateLimiter: Debug + Send + Sync {
    /// Waits until `size` units are granted or `cancel` fires.
    ///
    /// The unit is up to the caller: requests, bytes, rows.
    ///
    /// # Errors
    ///
    /// Returns [`LimitError::Cancelled`] if `cancel` fired first. After
    /// [`close`](Self::close), this keeps waiting until it does.
    ///
    /// Returns [`LimitError::Unsatisfiable`] at once if `size` exceeds what
    /// the limiter could ever grant.
    fn take<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        size: usize,
    ) -> BoxFuture<'a, Result<(), LimitError>>;

    /// Stops background work, granting whatever the bucket can still cover.
    ///
    /// Every call, concurrent ones included, returns only once that final
    /// pass has run.
    fn close(&self) -> BoxFuture<'_, Result<(), LimitError>>;

    /// Waits at most `timeout` for `size` units.
    ///
    /// # Errors
    ///
    /// Returns [`LimitError::Timeout`] if the deadline passed first.
    fn take_timeout(&self, size: usize, timeout: Duration) -> BoxFuture<'_, Result<(), LimitError>> {
        Box::pin(async move {
            let cancel = CancellationToken::new();
            tokio::time::timeout(timeout, self.take(&cancel, size)).await?
        })
    }
}
