//! Request normalization.
//!
//! Turns a raw `path?query` into a [`RequestDescriptor`] whose parameters are
//! in canonical order, or declines the request so the next handler can serve it.

use crate::config::{AllowList, ImageFormat};
use std::path::Path;

/// A transform request after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    /// URI path without the query string.
    pub path: String,
    /// Sorted by key, then value. Keys may repeat.
    pub search_params: Vec<(String, String)>,
}

impl RequestDescriptor {
    /// Builds a descriptor and sorts the parameters into canonical order.
    pub fn new(path: impl Into<String>, mut search_params: Vec<(String, String)>) -> Self {
        search_params.sort();
        Self { path: path.into(), search_params }
    }

    /// First value for `key` in canonical order.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.search_params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The query string re-encoded from the sorted parameters.
    pub fn canonical_query(&self) -> String {
        serde_urlencoded::to_string(&self.search_params).unwrap_or_default()
    }

    /// Lowercased extension of the requested path.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }

    /// Format implied by the path extension.
    pub fn source_format(&self) -> Option<ImageFormat> {
        self.extension().and_then(|e| ImageFormat::from_extension(&e))
    }
}

/// Normalizes `path_and_query`, returning `None` when the request is not a
/// transform request (no image extension, no query, unparsable or disallowed
/// parameters).
pub fn normalize(path_and_query: &str, allow: &AllowList) -> Option<RequestDescriptor> {
    let (path, query) = path_and_query.split_once('?')?;
    if query.is_empty() {
        return None;
    }

    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())?;
    ImageFormat::from_extension(&ext)?;

    let mut params: Vec<(String, String)> = match serde_urlencoded::from_str(query) {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!("Unparsable query on {}: {}", path, e);
            return None;
        }
    };
    if params.is_empty() {
        return None;
    }

    if let Some((k, v)) = params.iter().find(|(k, v)| !allow.permits(k, v)) {
        tracing::debug!("Parameter {}={} not allowed on {}", k, v, path);
        return None;
    }

    if !params.iter().any(|(k, _)| k == "format") {
        params.push(("format".to_string(), ext));
    }

    Some(RequestDescriptor::new(path, params))
}
