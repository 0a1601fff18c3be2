use fair_limit::LimitError;

/// Errors produced by the Tower Fair middleware stack.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuotaError {
    /// The request waited longer than allowed for its quota, or the whole
    /// managed stack exceeded its deadline.
    ///
    /// When the `axum` feature is enabled, this converts to `408 Request Timeout`.
    #[error("Request timed out waiting for quota")]
    Timeout,

    /// The wait for quota was cancelled before it was granted.
    ///
    /// When the `axum` feature is enabled, this converts to `503 Service Unavailable`.
    #[error("Request cancelled while waiting for quota")]
    Cancelled,

    /// The request costs more than the limiter can ever grant.
    ///
    /// When the `axum` feature is enabled, this converts to `413 Payload Too Large`.
    #[error("Request costs {cost} units but the limit is {limit} units per second")]
    Unsatisfiable {
        /// What the weigher charged for the request.
        cost: usize,
        /// The limiter's ceiling.
        limit: usize,
    },

    /// An unexpected error occurred in the inner service or the limiter.
    ///
    /// The string contains the `Display` representation of the inner error.
    /// When the `axum` feature is enabled, this converts to `500 Internal Server Error`.
    #[error("Internal service error: {0}")]
    Inner(String),
}

impl From<LimitError> for QuotaError {
    fn from(err: LimitError) -> Self {
        match err {
            LimitError::Cancelled => Self::Cancelled,
            LimitError::Timeout => Self::Timeout,
            LimitError::Unsatisfiable { size, limit } => Self::Unsatisfiable { cost: size, limit },
            other => Self::Inner(other.to_string()),
        }
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for QuotaError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match self {
            Self::Timeout => StatusCode::REQUEST_TIMEOUT,
            Self::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unsatisfiable { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Inner(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, self.to_string()).into_response()
    }
}
