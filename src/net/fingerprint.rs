//! Stable request fingerprinting (spec §4.B): the BlobStore cache key and the
//! in-flight dedup key are the same hash.

use sha2::{Digest, Sha256};
use url::Url;

/// Canonicalise `url` for fingerprinting: normalise scheme/host casing
/// (handled by the `url` crate itself on parse) and sort query pairs so
/// `?a=1&b=2` and `?b=2&a=1` fingerprint identically.
pub fn canonicalize_url(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    pairs.sort();
    let mut canon = url.clone();
    canon.set_query(None);
    let mut canon = canon.to_string();
    if !pairs.is_empty() {
        let query = pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        canon.push('?');
        canon.push_str(&query);
    }
    canon
}

/// A stable hash over `(method, canonicalised url, sorted cacheable headers,
/// body)`. Two semantically equal requests produce identical fingerprints.
pub fn compute(
    method: &str,
    url: &Url,
    cacheable_headers: &[(String, String)],
    body: Option<&[u8]>,
) -> String {
    let mut headers = cacheable_headers.to_vec();
    headers.sort();

    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonicalize_url(url).as_bytes());
    hasher.update([0u8]);
    for (k, v) in &headers {
        hasher.update(k.as_bytes());
        hasher.update([b'='; 1]);
        hasher.update(v.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update([0u8]);
    hasher.update(body.unwrap_or_default());

    hex::encode(hasher.finalize())
}
