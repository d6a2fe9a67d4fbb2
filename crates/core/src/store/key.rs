//! Request identity keys.

use sha2::{Digest, Sha256};

/// Compute the store key for a request.
///
/// Request identity is method plus canonical URL, so a GET and a HEAD for
/// the same URL never collide.
pub fn entry_key(method: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}
