//! ETag computation and conditional responses.

use crate::transform::ImageHandle;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};

/// Transformed images are addressed by their parameters, so they never change
/// under a URL.
pub const DEFAULT_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// Weak ETag over the encoded bytes: `W/"<len hex>-<digest prefix>"`.
pub fn etag_for(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("W/\"{:x}-{}\"", bytes.len(), &hex::encode(digest)[..16])
}

/// Builds the response for a finished image.
///
/// Answers `304 Not Modified` when `If-None-Match` equals the ETag. Otherwise
/// `200` with content type, cache control and ETag, after which `overrides`
/// are applied and replace any header they name.
pub fn build_response(image: &ImageHandle, request_headers: &HeaderMap, overrides: &HeaderMap) -> Response {
    let etag = etag_for(image.bytes());
    let etag_value = HeaderValue::from_str(&etag).unwrap_or(HeaderValue::from_static(""));

    let if_none_match = request_headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok());
    if if_none_match == Some(etag.as_str()) {
        crate::metrics::METRICS.record_not_modified();
        let mut headers = HeaderMap::new();
        headers.insert(header::ETAG, etag_value);
        return (StatusCode::NOT_MODIFIED, headers).into_response();
    }

    let content_type = image
        .metadata()
        .map(|m| m.format.content_type())
        .unwrap_or("application/octet-stream");

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(DEFAULT_CACHE_CONTROL));
    headers.insert(header::ETAG, etag_value);
    headers.extend(overrides.clone());

    (StatusCode::OK, headers, Body::from(image.bytes().clone())).into_response()
}
