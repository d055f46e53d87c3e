//! Filesystem-safe cache file names.
//!
//! Resource files are named by resource id; ids that are not filesystem-safe
//! are replaced by the hex digest of their SHA-256 hash so the on-disk
//! namespace stays partitioned by resource id with no collisions.

use sha2::{Digest, Sha256};

/// Longest id used verbatim as a file name.
const MAX_VERBATIM_LEN: usize = 128;

/// Derive the cache file name for a resource id.
///
/// Ids made of `[A-Za-z0-9._-]` (and not `.`/`..`) are used as-is; anything
/// else becomes the SHA-256 hex digest of the id.
#[must_use]
pub fn cache_file_name(resource_id: &str) -> String {
    if is_filesystem_safe(resource_id) {
        return resource_id.to_string();
    }
    hex_digest(resource_id)
}

fn is_filesystem_safe(id: &str) -> bool {
    if id.is_empty() || id.len() > MAX_VERBATIM_LEN || id == "." || id == ".." {
        return false;
    }
    id.bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

fn hex_digest(id: &str) -> String {
    let digest = Sha256::digest(id.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
