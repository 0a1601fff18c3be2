use axum::{
    Router, error_handling::HandleErrorLayer, extract::Request, http::StatusCode,
    response::IntoResponse, routing::get,
};
use fair_limit::TokenBucketRateLimiter;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tower::BoxError;
use tower::ServiceBuilder;
use tower_fair::{ManagedQuotaLayer, QuotaError};

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // 1. Setup Limiter: 10 requests per second, shared by every route.
    let limit = NonZeroUsize::new(10).ok_or("limit must be positive")?;
    let limiter = Arc::new(TokenBucketRateLimiter::new(limit));

    // 2. Setup Managed Layer
    let managed_layer = ManagedQuotaLayer::<_, Request>::new(limiter, Duration::from_millis(500));

    // 3. Build the Router
    let app = Router::new()
        .route("/", get(|| async { "Hello, Fair!" }))
        .layer(
            ServiceBuilder::new()
                // Turns the BoxError from the quota stack into a Response.
                .layer(HandleErrorLayer::new(handle_quota_error))
                .layer(managed_layer)
                // The Route is Infallible, the managed layer wants BoxError.
                .map_err(BoxError::from),
        );

    // 4. Serve
    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
    println!("Listening on http://127.0.0.1:3000");

    axum::serve(listener, app).await?;
    Ok(())
}

async fn handle_quota_error(err: BoxError) -> impl IntoResponse {
    if let Some(quota_err) = err.downcast_ref::<QuotaError>() {
        quota_err.clone().into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Service Error").into_response()
    }
}
