//! Identifier and digest helpers.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Generates a new run identifier (UUID v4).
#[must_use]
pub fn generate_run_id() -> Uuid {
    Uuid::new_v4()
}

/// Generates a new random UUID v4.
#[must_use]
pub fn generate_uuid() -> Uuid {
    Uuid::new_v4()
}

/// Returns the lowercase hex SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hashes a parameter set for resume comparison.
///
/// Keys are hashed in sorted order so the hash does not depend on map
/// iteration order.
#[must_use]
pub fn hash_parameters<'a, I>(params: I) -> String
where
    I: IntoIterator<Item = (&'a String, &'a serde_json::Value)>,
{
    let mut entries: Vec<_> = params.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut hasher = Sha256::new();
    for (key, value) in entries {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.to_string().as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(&hasher.finalize()[..16])
}
