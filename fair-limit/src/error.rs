/// Errors produced by a [`RateLimiter`](crate::RateLimiter).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimitError {
    /// The caller's cancellation token fired before the quota was granted.
    #[error("take cancelled before quota was granted")]
    Cancelled,

    /// The caller's deadline elapsed before the quota was granted.
    #[error("take timed out waiting for quota")]
    Timeout,

    /// A limiter was constructed with a limit of zero units per second.
    #[error("limit must be at least one unit per second")]
    InvalidLimit,

    /// The requested size exceeds the bucket ceiling and could never be granted.
    #[error("requested {size} units but the limit is {limit} units per second")]
    Unsatisfiable {
        /// The size requested by the caller.
        size: usize,
        /// The limiter's ceiling.
        limit: usize,
    },

    /// The scheduler task needs a tokio runtime to be spawned on.
    #[error("a tokio runtime is required to start the scheduler")]
    NoRuntime,
}

impl From<tokio::time::error::Elapsed> for LimitError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        LimitError::Timeout
    }
}
