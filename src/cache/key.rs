use crate::config::ImageFormat;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Hex characters of the digest kept in an identifier.
///
/// 32 bits: roughly a 1% chance of any collision once a single basename and
/// format accumulate ~9,300 distinct parameter sets. Identifiers are not a
/// security boundary.
pub const DIGEST_HEX_LEN: usize = 8;

/// Derives the cache entry identifier `<basename>.<digest>.<format>`.
///
/// `canonical_query` must already be in canonical order; see
/// [`RequestDescriptor::canonical_query`](crate::params::RequestDescriptor::canonical_query).
pub fn cache_id(path: &str, canonical_query: &str, format: ImageFormat) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update(b"?");
    hasher.update(canonical_query.as_bytes());
    let digest = hex::encode(hasher.finalize());

    format!("{}.{}.{}", basename(path), &digest[..DIGEST_HEX_LEN], format)
}

// File stem of the path, restricted to characters safe in a filename.
fn basename(path: &str) -> String {
    let stem = Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    let safe: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if safe.is_empty() { "image".to_string() } else { safe }
}
