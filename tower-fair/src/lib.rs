//! # Tower Fair
//!
//! `tower-fair` puts a [`fair_limit::RateLimiter`] in front of any
//! [Tower](https://github.com/tower-rs/tower) service.
//!
//! Every request is priced by a weigher (one unit by default, or e.g. its body
//! length for byte-rate limiting) and waits for that much quota before the
//! inner service sees it. Waiting requests are served in arrival order, so a
//! heavy request is not starved by a stream of light ones.
//!
//! ## The Managed Stack
//! [`ManagedQuotaLayer`] is a pre-composed stack for production use:
//!
//! 1. **Fair Queueing**: Requests wait for their quota in strict arrival order.
//! 2. **Timeouts**: The whole request, wait included, must finish within a
//!    deadline, failing with `QuotaError::Timeout` otherwise.
//! 3. **Error Mapping**: Converts internal Tower and limiter errors into a
//!    unified, cloneable [`QuotaError`] domain.
//!
//! ## Feature Flags
//!
//! - `axum`: Enables `IntoResponse` for [`QuotaError`], allowing automatic
//!   conversion to HTTP status codes (408, 413, 503, 500).
//! - `stress`: Builds the `stress_test` binary.

mod error;
mod ext;
mod layer;
mod managed_layer;
mod service;


pub use error::QuotaError;
pub use ext::ServiceBuilderExt;
pub use layer::QuotaLayer;
pub use managed_layer::ManagedQuotaLayer;
pub use service::QuotaService;
pub use service::Weigher;
