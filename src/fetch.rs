use crate::params::RequestDescriptor;
use crate::ImageServeError;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use mime::Mime;
use reqwest::{Client, StatusCode};
use std::path::{Component, Path, PathBuf};

/// Supplies original image bytes for a request.
///
/// `Ok(None)` means "not here" and lets the next loader try.
#[async_trait::async_trait]
pub trait SourceLoader: Send + Sync {
    async fn load(&self, request: &RequestDescriptor) -> Result<Option<Bytes>, ImageServeError>;
}

/// Reads sources from an ordered list of directories.
#[derive(Debug, Clone)]
pub struct FsLoader {
    dirs: Vec<PathBuf>,
    max_size: usize,
}

impl FsLoader {
    pub fn new(dirs: Vec<PathBuf>, max_size: usize) -> Self {
        Self { dirs, max_size }
    }

    /// Public directory first, then the project root.
    pub fn public_then_root(public_dir: PathBuf, root_dir: PathBuf, max_size: usize) -> Self {
        Self::new(vec![public_dir, root_dir], max_size)
    }
}

/// Percent-decodes a URI path into a relative path, refusing anything that
/// could escape the directory it is joined onto.
pub fn relative_source_path(uri_path: &str) -> Option<PathBuf> {
    let decoded = urlencoding::decode(uri_path).ok()?;
    let rel = Path::new(decoded.trim_start_matches('/'));
    if rel.as_os_str().is_empty() {
        return None;
    }
    rel.components()
        .all(|c| matches!(c, Component::Normal(_)))
        .then(|| rel.to_path_buf())
}

#[async_trait::async_trait]
impl SourceLoader for FsLoader {
    async fn load(&self, request: &RequestDescriptor) -> Result<Option<Bytes>, ImageServeError> {
        let Some(rel) = relative_source_path(&request.path) else {
            tracing::debug!("Refusing source path {}", request.path);
            return Ok(None);
        };

        for dir in &self.dirs {
            let candidate = dir.join(&rel);
            let meta = match tokio::fs::metadata(&candidate).await {
                Ok(meta) if meta.is_file() => meta,
                _ => continue,
            };
            if meta.len() as usize > self.max_size {
                return Err(ImageServeError::InvalidArgument(format!(
                    "{} exceeds size limit",
                    candidate.display()
                )));
            }
            let data = tokio::fs::read(&candidate).await?;
            return Ok(Some(Bytes::from(data)));
        }
        Ok(None)
    }
}

/// Fetches sources from a remote origin by appending the request path.
#[derive(Debug, Clone)]
pub struct HttpLoader {
    client: Client,
    origin: String,
    max_size: usize,
}

impl HttpLoader {
    pub fn new(origin: impl Into<String>, max_size: usize) -> Self {
        Self {
            client: Client::new(),
            origin: origin.into().trim_end_matches('/').to_string(),
            max_size,
        }
    }

    pub fn url_for(&self, request: &RequestDescriptor) -> String {
        format!("{}{}", self.origin, request.path)
    }
}

#[async_trait::async_trait]
impl SourceLoader for HttpLoader {
    /// Streams the source with the size cap enforced on the body as well as
    /// on `Content-Length`, so a lying header cannot bypass it.
    async fn load(&self, request: &RequestDescriptor) -> Result<Option<Bytes>, ImageServeError> {
        let url = self.url_for(request);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ImageServeError::NetworkError(e.to_string()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(ImageServeError::NetworkError(format!(
                "Upstream status: {}",
                resp.status()
            )));
        }

        let ct = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if let Ok(m) = ct.parse::<Mime>() {
            if m.type_().as_str() != "image" {
                return Err(ImageServeError::InvalidArgument(format!(
                    "Source {} is not an image ({})",
                    url, m
                )));
            }
        }
        // Unknown MIME types continue - will be validated during decode

        if let Some(len) = resp.content_length() {
            if len as usize > self.max_size {
                return Err(ImageServeError::InvalidArgument(
                    "Input exceeds size limit".into(),
                ));
            }
        }

        let mut buf = BytesMut::with_capacity(8192);
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream
            .next()
            .await
            .transpose()
            .map_err(|e| ImageServeError::NetworkError(e.to_string()))?
        {
            if buf.len() + chunk.len() > self.max_size {
                return Err(ImageServeError::InvalidArgument(
                    "Input exceeds size limit".into(),
                ));
            }
            buf.extend_from_slice(&chunk);
        }

        Ok(Some(buf.freeze()))
    }
}

/// Loads the source for `request`: the custom loader first, then the
/// filesystem fallback. Failures are logged and treated as absence.
pub async fn load_source(
    custom: Option<&dyn SourceLoader>,
    fallback: &FsLoader,
    request: &RequestDescriptor,
) -> Option<Bytes> {
    if let Some(loader) = custom {
        match loader.load(request).await {
            Ok(Some(bytes)) => return Some(bytes),
            Ok(None) => tracing::debug!("Custom loader has no source for {}", request.path),
            Err(e) => tracing::warn!("Custom loader failed for {}: {}", request.path, e),
        }
    }

    match fallback.load(request).await {
        Ok(found) => found,
        Err(e) => {
            tracing::warn!("Failed to read source {}: {}", request.path, e);
            None
        }
    }
}
