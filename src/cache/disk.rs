use crate::cache::{Cache, CacheError};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Disk-based cache: one file per entry, named by its identifier.
///
/// No eviction and no locking; concurrent writers of one identifier race and
/// the last write wins.
pub struct DiskCache {
    dir: PathBuf
}

impl DiskCache {
    /// Opens the cache, creating `dir` if it does not exist.
    pub async fn open(dir: PathBuf) -> Result<Self, CacheError> {
        fs::create_dir_all(&dir).await?;
        tracing::info!("Disk cache at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(id)
    }
}

#[async_trait::async_trait]
impl Cache for DiskCache {
    async fn get(&self, id: &str) -> Result<Option<Bytes>, CacheError> {
        let p = self.path_for(id);
        match fs::read(&p).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, id: &str, data: &[u8]) -> Result<(), CacheError> {
        fs::write(self.path_for(id), data).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested").join("cache");
        let cache = DiskCache::open(dir.clone()).await.unwrap();
        assert!(dir.is_dir());
        assert_eq!(cache.dir(), dir.as_path());
    }

    #[tokio::test]
    async fn entries_are_files_named_by_id() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(tmp.path().to_path_buf()).await.unwrap();

        assert!(cache.get("cat.1234abcd.webp").await.unwrap().is_none());
        cache.put("cat.1234abcd.webp", b"first").await.unwrap();
        cache.put("cat.1234abcd.webp", b"second").await.unwrap();

        assert_eq!(
            std::fs::read(tmp.path().join("cat.1234abcd.webp")).unwrap(),
            b"second"
        );
        assert_eq!(
            cache.get("cat.1234abcd.webp").await.unwrap().unwrap(),
            Bytes::from_static(b"second")
        );
    }
}
