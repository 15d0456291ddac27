//! Request handling: normalize, derive the cache identifier, read through the
//! cache, compute on a miss, and answer with a conditional response.

use crate::cache::{cache_id, ImageCache};
use crate::coalesce::Coalescer;
use crate::config::{ImageFormat, ImageServeConfig};
use crate::fetch::{load_source, FsLoader, SourceLoader};
use crate::metrics::METRICS;
use crate::params::{normalize, RequestDescriptor};
use crate::response::build_response;
use crate::transform::{
    build_pipeline, builtin_factories_bounded, execute, resolve_config, ImageHandle, Transform,
    TransformFactory,
};
use axum::http::{HeaderMap, Uri};
use axum::response::Response;
use std::sync::Arc;

pub struct ImageService {
    config: ImageServeConfig,
    cache: Arc<ImageCache>,
    factories: Vec<Arc<dyn TransformFactory>>,
    fallback: Arc<FsLoader>,
    coalescer: Option<Coalescer>,
}

/// What one request needs to produce its image, owned so it can outlive the
/// handler when shared through the coalescer.
struct Job {
    id: String,
    request: RequestDescriptor,
    transforms: Vec<Arc<dyn Transform>>,
    remove_exif: bool,
    cache: Arc<ImageCache>,
    loader: Option<Arc<dyn SourceLoader>>,
    fallback: Arc<FsLoader>,
}

impl ImageService {
    /// Validates the configuration and opens the cache. Called once at startup.
    pub async fn init(config: ImageServeConfig) -> crate::Result<Self> {
        config.validate().map_err(|e| crate::ImageServeError::InvalidArgument(e.to_string()))?;
        let cache = ImageCache::open(&config.cache).await?;
        Ok(Self::with_cache(config, cache))
    }

    /// Uses `cache` in place of the configured backend.
    pub fn with_cache(config: ImageServeConfig, cache: ImageCache) -> Self {
        let mut factories = builtin_factories_bounded(config.max_width, config.max_height);
        factories.extend(config.extra_transforms.iter().cloned());
        let fallback = FsLoader::public_then_root(
            config.public_dir.clone(),
            config.root_dir.clone(),
            config.max_input_size,
        );
        let coalescer = config.coalesce_requests.then(Coalescer::new);

        Self {
            cache: Arc::new(cache),
            factories,
            fallback: Arc::new(fallback),
            coalescer,
            config,
        }
    }

    pub fn config(&self) -> &ImageServeConfig {
        &self.config
    }

    /// Answers an image request, or returns `None` to hand it to the next
    /// handler.
    pub async fn handle(&self, uri: &Uri, headers: &HeaderMap) -> Option<Response> {
        let path_and_query = uri.path_and_query()?.as_str();
        let request = normalize(path_and_query, &self.config.allow)?;

        let image_config = resolve_config(&request, &self.factories);
        let output_format = image_config
            .as_ref()
            .map(|c| c.output_format())
            .or_else(|| request.source_format())
            .unwrap_or(ImageFormat::png);
        let transforms = image_config
            .as_ref()
            .map(|c| build_pipeline(c, &self.factories))
            .unwrap_or_default();

        let id = cache_id(&request.path, &request.canonical_query(), output_format);
        let overrides = self.config.headers.resolve(&request);

        let job = Job {
            id: id.clone(),
            remove_exif: self.config.remove_exif.resolve(&request),
            request,
            transforms,
            cache: self.cache.clone(),
            loader: self.config.loader.clone(),
            fallback: self.fallback.clone(),
        };

        let image = match &self.coalescer {
            Some(coalescer) => coalescer.run(&id, job.run()).await,
            None => job.run().await,
        };

        match image {
            Some(image) => Some(build_response(&image, headers, &overrides)),
            None => {
                METRICS.record_passthrough();
                None
            }
        }
    }
}

impl Job {
    async fn run(self) -> Option<ImageHandle> {
        if let Some(image) = self.cache.read(&self.id).await {
            tracing::debug!("Cache hit for {}", self.id);
            METRICS.record_hit();
            return Some(image);
        }
        METRICS.record_miss();
        tracing::debug!("Cache miss for {}", self.id);

        let source = load_source(self.loader.as_deref(), &self.fallback, &self.request).await?;

        METRICS.record_transform();
        let image = match execute(self.transforms, ImageHandle::new(source), self.remove_exif).await {
            Ok(image) => image,
            Err(e) => {
                METRICS.record_error();
                tracing::warn!("Transform failed for {}: {}", self.request.path, e);
                return None;
            }
        };

        self.cache.write(&self.id, &image).await;
        Some(image)
    }
}
