use futures::future::BoxFuture;
use futures::future::ready;
use tokio_util::sync::CancellationToken;

use crate::LimitError;
use crate::RateLimiter;

/// A [`RateLimiter`] that grants everything immediately.
///
/// Lets callers switch rate limiting off without changing how they call it.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unlimiter;

impl Unlimiter {
    pub fn new() -> Self {
        Self
    }
}

impl RateLimiter for Unlimiter {
    fn take<'a>(
        &'a self,
        _cancel: &'a CancellationToken,
        _size: usize,
    ) -> BoxFuture<'a, Result<(), LimitError>> {
        Box::pin(ready(Ok(())))
    }

    fn close(&self) -> BoxFuture<'_, Result<(), LimitError>> {
        Box::pin(ready(Ok(())))
    }
}
