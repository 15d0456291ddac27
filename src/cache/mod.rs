// Re-export modules
pub mod disk;
pub mod key;
pub mod sled_cache;

pub use disk::DiskCache;
pub use key::cache_id;
pub use sled_cache::SledCache;

use crate::config::CacheBackend;
use crate::transform::{execute, ImageHandle};
use bytes::Bytes;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),
}

/// Trait for cache backends
#[async_trait::async_trait]
pub trait Cache: Send + Sync {
    /// Get the persisted bytes for an identifier
    async fn get(&self, id: &str) -> Result<Option<Bytes>, CacheError>;

    /// Store bytes under an identifier, replacing any previous entry
    async fn put(&self, id: &str, data: &[u8]) -> Result<(), CacheError>;
}

/// Cache-aside store for transformed images.
///
/// Failures never escape: a failed read is a miss and a failed write is
/// logged and dropped, so the request can still be answered from memory.
pub struct ImageCache {
    backend: Option<Box<dyn Cache>>,
}

impl ImageCache {
    /// Opens the configured backend, creating its storage if needed.
    pub async fn open(backend: &CacheBackend) -> Result<Self, CacheError> {
        let backend: Option<Box<dyn Cache>> = match backend {
            CacheBackend::Disabled => None,
            CacheBackend::Disk(dir) => Some(Box::new(DiskCache::open(dir.clone()).await?)),
            CacheBackend::Sled(dir) => Some(Box::new(SledCache::open(dir)?)),
        };
        Ok(Self { backend })
    }

    pub fn disabled() -> Self {
        Self { backend: None }
    }

    pub fn with_backend(backend: impl Cache + 'static) -> Self {
        Self { backend: Some(Box::new(backend)) }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Loads an entry and re-attaches its metadata with an empty pipeline.
    pub async fn read(&self, id: &str) -> Option<ImageHandle> {
        let backend = self.backend.as_ref()?;
        let bytes = match backend.get(id).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Cache read failed for {}: {}", id, e);
                return None;
            }
        };

        match execute(Vec::new(), ImageHandle::new(bytes), false).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!("Discarding unreadable cache entry {}: {}", id, e);
                None
            }
        }
    }

    pub async fn write(&self, id: &str, image: &ImageHandle) {
        let Some(backend) = self.backend.as_ref() else { return };
        if let Err(e) = backend.put(id, image.bytes()).await {
            tracing::warn!("Failed to cache transformed image {}: {}", id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct MemoryCache {
        entries: Mutex<HashMap<String, Bytes>>,
    }

    #[async_trait::async_trait]
    impl Cache for MemoryCache {
        async fn get(&self, id: &str) -> Result<Option<Bytes>, CacheError> {
            Ok(self.entries.lock().await.get(id).cloned())
        }

        async fn put(&self, id: &str, data: &[u8]) -> Result<(), CacheError> {
            self.entries.lock().await.insert(id.to_string(), Bytes::copy_from_slice(data));
            Ok(())
        }
    }

    struct BrokenCache;

    #[async_trait::async_trait]
    impl Cache for BrokenCache {
        async fn get(&self, _id: &str) -> Result<Option<Bytes>, CacheError> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into())
        }

        async fn put(&self, _id: &str, _data: &[u8]) -> Result<(), CacheError> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into())
        }
    }

    fn png_bytes(w: u32, h: u32) -> Bytes {
        let img = image::DynamicImage::new_rgb8(w, h);
        let mut out = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png).unwrap();
        Bytes::from(out)
    }

    #[tokio::test]
    async fn write_then_read_restores_metadata() {
        let cache = ImageCache::with_backend(MemoryCache::default());
        let handle = execute(Vec::new(), ImageHandle::new(png_bytes(12, 7)), false).await.unwrap();
        cache.write("a.00000000.png", &handle).await;

        let restored = cache.read("a.00000000.png").await.unwrap();
        assert_eq!(restored.metadata(), handle.metadata());
        assert_eq!(restored.bytes(), handle.bytes());
    }

    #[tokio::test]
    async fn corrupt_entry_is_a_miss() {
        let backend = MemoryCache::default();
        backend.put("bad.00000000.png", b"not an image").await.unwrap();
        let cache = ImageCache::with_backend(backend);
        assert!(cache.read("bad.00000000.png").await.is_none());
    }

    #[tokio::test]
    async fn backend_errors_are_swallowed() {
        let cache = ImageCache::with_backend(BrokenCache);
        let handle = ImageHandle::new(png_bytes(2, 2));
        cache.write("x.00000000.png", &handle).await;
        assert!(cache.read("x.00000000.png").await.is_none());
    }

    #[tokio::test]
    async fn disabled_cache_never_hits() {
        let cache = ImageCache::open(&CacheBackend::Disabled).await.unwrap();
        assert!(!cache.is_enabled());
        cache.write("a.00000000.png", &ImageHandle::new(png_bytes(2, 2))).await;
        assert!(cache.read("a.00000000.png").await.is_none());
    }
}
