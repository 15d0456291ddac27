use axum::{
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use thiserror::Error;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::services::ServeDir;

pub mod cache;
pub mod coalesce;
pub mod config;
pub mod fetch;
pub mod metrics;
pub mod params;
pub mod response;
pub mod service;
pub mod transform;

pub use config::{AllowList, CacheBackend, ImageFormat, ImageServeConfig, PerRequest};
pub use service::ImageService;

use crate::metrics::METRICS;

#[derive(Error, Debug)]
pub enum ImageServeError {
    #[error("Cache error: {0}")]
    CacheError(#[from] cache::CacheError),
    #[error("Transformation error: {0}")]
    TransformError(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Internal server error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, ImageServeError>;

/// Middleware that answers image transform requests and forwards everything
/// else to the wrapped service.
pub async fn image_middleware(
    State(service): State<Arc<ImageService>>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::GET && request.method() != Method::HEAD {
        return next.run(request).await;
    }

    // Body is not Sync; nothing borrowed from the request may cross an await.
    let (uri, headers) = (request.uri().clone(), request.headers().clone());
    let handled = service.handle(&uri, &headers).await;
    match handled {
        Some(response) => response,
        None => next.run(request).await,
    }
}

/// Layers image handling in front of an existing router.
/// Usage: `let app = imageserve::attach(app, service)`
pub fn attach<S>(app: Router<S>, service: Arc<ImageService>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    app.layer(middleware::from_fn_with_state(service, image_middleware))
}

/// Health check endpoint
async fn health_handler() -> impl IntoResponse {
    use serde_json::json;

    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "imageserve"
    }))
}

/// Metrics endpoint (Prometheus-compatible plain text)
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        METRICS.render(),
    )
}

/// Per-client rate limit for image and static routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Seconds to replenish one request of the quota.
    pub per_second: u64,
    pub burst_size: u32,
}

impl Default for RateLimit {
    // one request back every 10s, bursts of up to 30
    fn default() -> Self {
        Self { per_second: 10, burst_size: 30 }
    }
}

/// Router serving the public directory, with transform requests answered
/// by `service` and observability endpoints alongside.
///
/// `rate_limit` applies to everything except `/health` and `/metrics`. It
/// keys on the peer address, so serve with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn router(service: Arc<ImageService>, rate_limit: Option<RateLimit>) -> Router {
    let public_dir = service.config().public_dir.clone();

    // Observability endpoints - NO rate limiting
    let observability_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler));

    let mut image_routes = attach(
        Router::new().fallback_service(ServeDir::new(public_dir)),
        service,
    );

    if let Some(limit) = rate_limit {
        match GovernorConfigBuilder::default()
            .per_second(limit.per_second)
            .burst_size(limit.burst_size)
            .finish()
        {
            Some(governor_conf) => {
                tracing::info!(
                    "Rate limiting enabled: one request per {}s, burst {}",
                    limit.per_second,
                    limit.burst_size
                );
                image_routes = image_routes.layer(GovernorLayer {
                    config: Box::leak(Box::new(governor_conf)),
                });
            }
            None => tracing::warn!("Ignoring invalid rate limit {:?}", limit),
        }
    }

    Router::new()
        .merge(observability_routes)
        .merge(image_routes)
}
