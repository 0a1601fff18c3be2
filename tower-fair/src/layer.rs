use std::sync::Arc;
use std::time::Duration;

use fair_limit::RateLimiter;
use tower::Layer;

use crate::service::QuotaService;
use crate::service::Weigher;
use crate::service::unit_cost;

/// Charges quota for requests.
pub struct QuotaLayer<L, Req>
where
    L: ?Sized,
{
    limiter: Arc<L>,
    weigher: Weigher<Req>,
    timeout: Option<Duration>,
}

impl<L, Req> Clone for QuotaLayer<L, Req>
where
    L: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
            weigher: Arc::clone(&self.weigher),
            timeout: self.timeout,
        }
    }
}

impl<L, Req> QuotaLayer<L, Req>
where
    L: RateLimiter + ?Sized,
    Req: 'static,
{
    /// Create a QuotaLayer charging one unit per request.
    pub fn new(limiter: Arc<L>) -> Self {
        QuotaLayer {
            limiter,
            weigher: Arc::new(unit_cost::<Req>),
            timeout: None,
        }
    }

    /// Set how many units a request costs.
    ///
    /// Useful for byte-rate limiting, where the cost is the body length.
    pub fn with_weigher<F>(mut self, weigher: F) -> Self
    where
        F: Fn(&Req) -> usize + Send + Sync + 'static,
    {
        self.weigher = Arc::new(weigher);
        self
    }

    /// Set how long a request may wait for its quota.
    ///
    /// If the quota is not granted within this duration, the service
    /// will return `QuotaError::Timeout` without calling the inner service.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<L, S, Req> Layer<S> for QuotaLayer<L, Req>
where
    L: ?Sized,
    Req: 'static,
{
    type Service = QuotaService<L, S, Req>;

    fn layer(&self, service: S) -> Self::Service {
        let mut svc = QuotaService::new(service, self.limiter.clone())
            .with_weigher(Arc::clone(&self.weigher));
        if let Some(timeout) = self.timeout {
            svc = svc.with_timeout(timeout);
        }
        svc
    }
}
