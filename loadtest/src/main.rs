use goose::prelude::*;
use rand::Rng;

/// Load testing suite for the imageserve transform server.
///
/// Expects the server's public directory to contain `photo.jpg` and
/// `banner.png`. Traffic mixes:
/// - repeated variants (cache hits after the first request)
/// - randomized variants (cache misses, full decode/transform/encode)
/// - conditional requests answered with 304
/// - plain static files and health checks
///
/// # Usage
/// ```bash
/// cd loadtest
/// cargo run --release -- --host http://localhost:8080 --users 10 --hatch-rate 2 --run-time 60s
/// ```
///
/// Run the server with `DISABLE_RATE_LIMIT=1`, otherwise most requests
/// are rejected with 429.

#[tokio::main]
async fn main() -> Result<(), GooseError> {
    GooseAttack::initialize()?
        .register_scenario(
            scenario!("ImageTransformation")
                .register_transaction(transaction!(random_variant).set_weight(10)?)
                .register_transaction(transaction!(static_file).set_weight(2)?)
                .register_transaction(transaction!(health_check).set_weight(1)?),
        )
        .register_scenario(
            scenario!("CachePerformance")
                .register_transaction(transaction!(cached_variant).set_weight(15)?)
                .register_transaction(transaction!(revalidate).set_weight(5)?),
        )
        .execute()
        .await?;

    Ok(())
}

/// Random sizes and formats spread requests over many cache identifiers.
async fn random_variant(user: &mut GooseUser) -> TransactionResult {
    // Build the URL before awaiting; ThreadRng is not Send
    let url = {
        let mut rng = rand::thread_rng();
        let width = rng.gen_range(100..1000);
        let formats = ["webp", "jpeg", "png", "avif"];
        let format = formats[rng.gen_range(0..formats.len())];
        format!("/photo.jpg?w={}&format={}&q=80", width, format)
    };

    let _goose = user.get(&url).await?;
    Ok(())
}

/// Fixed parameters, so everything after warmup is a cache hit.
async fn cached_variant(user: &mut GooseUser) -> TransactionResult {
    let _goose = user.get("/banner.png?w=500&format=webp").await?;
    Ok(())
}

/// Re-requests a variant with its ETag; the server should answer 304.
async fn revalidate(user: &mut GooseUser) -> TransactionResult {
    let path = "/banner.png?w=320&format=jpeg";
    let goose = user.get(path).await?;
    let etag = goose
        .response
        .ok()
        .and_then(|r| r.headers().get("etag").and_then(|v| v.to_str().ok()).map(String::from));

    if let Some(etag) = etag {
        let request_builder = user
            .get_request_builder(&GooseMethod::Get, path)?
            .header("If-None-Match", etag);
        let goose_request = GooseRequest::builder()
            .set_request_builder(request_builder)
            .expect_status_code(304)
            .build();
        let _goose = user.request(goose_request).await?;
    }
    Ok(())
}

/// Untransformed request served straight from the public directory.
async fn static_file(user: &mut GooseUser) -> TransactionResult {
    let _goose = user.get("/photo.jpg").await?;
    Ok(())
}

async fn health_check(user: &mut GooseUser) -> TransactionResult {
    let _goose = user.get("/health").await?;
    Ok(())
}
