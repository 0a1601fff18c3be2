use std::sync::Arc;
use std::time::Duration;

use fair_limit::RateLimiter;
use tower::ServiceBuilder;
use tower::layer::util::Stack;

use crate::QuotaLayer;

type DynLimiter = dyn RateLimiter + 'static;

/// Service Builder Extension adding quota layers to tower::ServiceBuilder.
pub trait ServiceBuilderExt<L> {
    /// Charge one unit per request, waiting as long as it takes.
    fn quota<Req: 'static>(
        self,
        limiter: Arc<DynLimiter>,
    ) -> ServiceBuilder<Stack<QuotaLayer<DynLimiter, Req>, L>>;

    /// Charge `weigher(&req)` units per request, waiting at most `timeout`.
    fn weighted_quota<Req, F>(
        self,
        limiter: Arc<DynLimiter>,
        weigher: F,
        timeout: Duration,
    ) -> ServiceBuilder<Stack<QuotaLayer<DynLimiter, Req>, L>>
    where
        Req: 'static,
        F: Fn(&Req) -> usize + Send + Sync + 'static;
}

impl<L> ServiceBuilderExt<L> for ServiceBuilder<L> {
    fn quota<Req: 'static>(
        self,
        limiter: Arc<DynLimiter>,
    ) -> ServiceBuilder<Stack<QuotaLayer<DynLimiter, Req>, L>> {
        self.layer(QuotaLayer::new(limiter))
    }

    fn weighted_quota<Req, F>(
        self,
        limiter: Arc<DynLimiter>,
        weigher: F,
        timeout: Duration,
    ) -> ServiceBuilder<Stack<QuotaLayer<DynLimiter, Req>, L>>
    where
        Req: 'static,
        F: Fn(&Req) -> usize + Send + Sync + 'static,
    {
        self.layer(
            QuotaLayer::new(limiter)
                .with_weigher(weigher)
                .with_timeout(timeout),
        )
    }
}
