use std::sync::Arc;
use std::time::Duration;

use fair_limit::RateLimiter;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::util::BoxCloneSyncService;

use crate::QuotaError;
use crate::QuotaService;
use crate::service::Weigher;
use crate::service::unit_cost;

/// A quota stack with a hard deadline.
///
/// Requests queue for their quota in arrival order, and the whole request,
/// wait plus inner service time, must finish within `max_wait`.
///
/// ### Error Responsibilities:
/// - **Timeout (`QuotaError::Timeout`)**: The deadline passed, either while
///   waiting for quota or inside the inner service.
/// - **Unsatisfiable (`QuotaError::Unsatisfiable`)**: The request costs more
///   than the limiter could ever grant. Returned without waiting.
/// - **Inner (`QuotaError::Inner`)**: Anything the inner service failed with.
pub struct ManagedQuotaLayer<L, Req>
where
    L: ?Sized,
{
    limiter: Arc<L>,
    max_wait: Duration,
    weigher: Weigher<Req>,
}

// A derived Clone would demand `Req: Clone`.
impl<L, Req> Clone for ManagedQuotaLayer<L, Req>
where
    L: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            max_wait: self.max_wait,
            weigher: self.weigher.clone(),
        }
    }
}

impl<S, L, Req> Layer<S> for ManagedQuotaLayer<L, Req>
where
    L: RateLimiter + ?Sized + 'static,
    S: Service<Req, Error = BoxError> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    Req: Send + 'static,
{
    type Service = BoxCloneSyncService<Req, S::Response, BoxError>;

    fn layer(&self, inner: S) -> Self::Service {
        let quota = QuotaService::new(inner, self.limiter.clone()).with_weigher(self.weigher.clone());

        // Timeout is outer to ensure a hard deadline on the entire process.
        let svc = tower::ServiceBuilder::new()
            .timeout(self.max_wait)
            .service(quota);

        // Map the mixed errors into QuotaError
        let mapped_svc = tower::util::MapErr::new(svc, |err: BoxError| {
            if err.is::<tower::timeout::error::Elapsed>() {
                BoxError::from(QuotaError::Timeout)
            } else if let Some(quota_err) = err.downcast_ref::<QuotaError>() {
                BoxError::from(quota_err.clone())
            } else {
                // Wrap any other inner service errors
                Box::from(QuotaError::Inner(err.to_string()))
            }
        });

        BoxCloneSyncService::new(mapped_svc)
    }
}

impl<L, Req> ManagedQuotaLayer<L, Req>
where
    L: RateLimiter + ?Sized,
    Req: 'static,
{
    pub fn new(limiter: Arc<L>, max_wait: Duration) -> Self {
        Self {
            limiter,
            max_wait,
            weigher: Arc::new(unit_cost::<Req>),
        }
    }

    /// Set how many units a request costs.
    pub fn with_weigher<F>(mut self, weigher: F) -> Self
    where
        F: Fn(&Req) -> usize + Send + Sync + 'static,
    {
        self.weigher = Arc::new(weigher);
        self
    }
}
