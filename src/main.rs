use imageserve::{config::ImageServeConfig, fetch::HttpLoader, router, ImageService, RateLimit};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// imageserve standalone server entry point.
///
/// Serves the public directory and answers image requests carrying transform
/// parameters, e.g. `/photo.png?w=200&format=webp`.
///
/// # Configuration
/// Environment variables:
/// - `IMAGESERVE_CACHE`: `disk` (default), `sled` or `off`
/// - `IMAGESERVE_CACHE_DIR`: cache location (default: `./cache`)
/// - `IMAGESERVE_PUBLIC_DIR` / `IMAGESERVE_ROOT_DIR`: where sources are looked up
/// - `IMAGESERVE_ORIGIN`: fetch sources from this base URL before the filesystem
/// - `IMAGESERVE_REMOVE_EXIF`, `IMAGESERVE_ALLOW`, `IMAGESERVE_COALESCE`,
///   `IMAGESERVE_MAX_INPUT_SIZE`
/// - `IMAGESERVE_MAX_WIDTH` / `IMAGESERVE_MAX_HEIGHT`: resize bounds (default: 4096)
/// - `PORT`: HTTP listen port (default: 8080)
/// - `DISABLE_RATE_LIMIT`: turn off the per-IP limit on image routes
/// - `RUST_LOG`: Logging verbosity (default: "imageserve=debug,tower_http=debug")
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "imageserve=debug,tower_http=debug".into())
        )
        .init();

    tracing::info!("Starting imageserve");

    let mut cfg = ImageServeConfig::from_env()?;
    if let Ok(origin) = std::env::var("IMAGESERVE_ORIGIN") {
        tracing::info!("Loading sources from {}", origin);
        cfg.loader = Some(Arc::new(HttpLoader::new(origin, cfg.max_input_size)));
    }
    tracing::debug!("Configuration: {:?}", cfg);

    let service = Arc::new(ImageService::init(cfg).await?);
    let rate_limit = if std::env::var("DISABLE_RATE_LIMIT").is_err() {
        Some(RateLimit::default())
    } else {
        tracing::info!("Rate limiting disabled");
        None
    };
    let app = router(service, rate_limit).layer(TraceLayer::new_for_http());

    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse::<u16>()
        .unwrap_or(8080);

    // Bind to 0.0.0.0 for external access (required for containerized deployment)
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
