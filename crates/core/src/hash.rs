//! Deterministic cache key generation.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::Error;

/// Compute a cache key for one call of a named operation.
///
/// The key is the hex SHA-256 of the operation name and the JSON encoding of
/// its arguments, so equal arguments always map to the same key. [`Value`]
/// encodes non-finite reals apart from `null`, keeping distinct bind
/// parameters on distinct keys.
///
/// [`Value`]: crate::Value
pub fn compute_cache_key<A: Serialize + ?Sized>(operation: &str, args: &A) -> Result<String, Error> {
    let encoded = serde_json::to_vec(args)?;
    let mut hasher = Sha256::new();
    hasher.update(operation.as_bytes());
    hasher.update(b"\n");
    hasher.update(&encoded);
    Ok(hex::encode(hasher.finalize()))
}
