use crate::cache::{Cache, CacheError};
use bytes::Bytes;
use std::path::Path;

/// Sled-backed cache.
///
/// Stores each entry under its identifier in a single embedded database,
/// which suits deployments where many small files are undesirable. Entries
/// are never evicted.
pub struct SledCache {
    db: sled::Db,
}

impl SledCache {
    /// Open (or create) the sled database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let db = sled::open(path.as_ref())?;
        tracing::info!("Sled cache at {}", path.as_ref().display());
        Ok(Self { db })
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }
}

#[async_trait::async_trait]
impl Cache for SledCache {
    async fn get(&self, id: &str) -> Result<Option<Bytes>, CacheError> {
        Ok(self.db.get(id.as_bytes())?.map(|v| Bytes::copy_from_slice(&v)))
    }

    async fn put(&self, id: &str, data: &[u8]) -> Result<(), CacheError> {
        self.db.insert(id.as_bytes(), data)?;
        self.db.flush_async().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_and_overwrites() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = SledCache::open(tmp.path().join("db")).unwrap();
        assert!(cache.is_empty());

        cache.put("a.00000000.png", b"one").await.unwrap();
        cache.put("a.00000000.png", b"two").await.unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get("a.00000000.png").await.unwrap(),
            Some(Bytes::from_static(b"two"))
        );
        assert!(cache.get("b.00000000.png").await.unwrap().is_none());
    }
}
