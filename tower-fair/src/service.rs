use std::fmt;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use fair_limit::RateLimiter;
use futures::future::BoxFuture;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use opentelemetry::metrics::Histogram;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tower::Service;
use tracing::trace;

use crate::error::QuotaError;

/// Prices a request in quota units.
pub type Weigher<Req> = Arc<dyn Fn(&Req) -> usize + Send + Sync>;

#[derive(Clone, Debug)]
struct QuotaServiceMetrics {
    wait: Histogram<f64>,
    rejected: Counter<u64>,
}

impl QuotaServiceMetrics {
    fn new() -> Self {
        let meter = global::meter("quota_service");
        Self {
            wait: meter.f64_histogram("quota_wait").with_unit("s").build(),
            rejected: meter.u64_counter("quota_rejected").build(),
        }
    }
}

/// Charges every request its weight in quota before handing it to `inner`.
///
/// Readiness is the inner service's. The wait for quota happens inside the
/// response future, so a request that is dropped stops waiting and is never
/// charged.
pub struct QuotaService<L, S, Req>
where
    L: ?Sized,
{
    inner: S,
    limiter: Arc<L>,
    weigher: Weigher<Req>,
    timeout: Option<Duration>,
    instruments: QuotaServiceMetrics,
}

// Weigher<Req> is always Clone, whatever Req is.
impl<L, S, Req> Clone for QuotaService<L, S, Req>
where
    L: ?Sized,
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: Arc::clone(&self.limiter),
            weigher: Arc::clone(&self.weigher),
            timeout: self.timeout,
            instruments: self.instruments.clone(),
        }
    }
}

impl<L, S, Req> fmt::Debug for QuotaService<L, S, Req>
where
    L: fmt::Debug + ?Sized,
    S: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaService")
            .field("inner", &self.inner)
            .field("limiter", &self.limiter)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<L, S, Req> Service<Req> for QuotaService<L, S, Req>
where
    L: RateLimiter + ?Sized + 'static,
    S: Service<Req, Error = BoxError> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<S::Response, BoxError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        // Keep the instance that was driven to readiness for this request.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let cost = (self.weigher)(&req);
        let limiter = Arc::clone(&self.limiter);
        let timeout = self.timeout;
        let instruments = self.instruments.clone();

        Box::pin(async move {
            let wait_start = Instant::now();
            let taken = match timeout {
                Some(timeout) => limiter.take_timeout(cost, timeout).await,
                None => {
                    let cancel = CancellationToken::new();
                    limiter.take(&cancel, cost).await
                }
            };
            instruments
                .wait
                .record(wait_start.elapsed().as_secs_f64(), &[]);

            if let Err(err) = taken {
                trace!(cost, %err, "request refused quota");
                instruments.rejected.add(1, &[]);
                return Err(BoxError::from(QuotaError::from(err)));
            }
            inner.call(req).await
        })
    }
}

pub(crate) fn unit_cost<Req>(_: &Req) -> usize {
    1
}

impl<L, S, Req> QuotaService<L, S, Req>
where
    L: ?Sized,
    Req: 'static,
{
    /// Charges every request one unit.
    pub fn new(inner: S, limiter: Arc<L>) -> Self {
        Self {
            inner,
            limiter,
            weigher: Arc::new(unit_cost::<Req>),
            timeout: None,
            instruments: QuotaServiceMetrics::new(),
        }
    }

    pub fn with_weigher(mut self, weigher: Weigher<Req>) -> Self {
        self.weigher = weigher;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
