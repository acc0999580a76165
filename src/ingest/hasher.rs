//! Content identity
//!
//! SHA-256 over the full file bytes, hex encoded. Used purely as a dedup key.

use sha2::{Digest, Sha256};

/// Length of a hex digest produced by [`content_hash`]
pub const HASH_HEX_LEN: usize = 64;

/// Hex SHA-256 of `bytes`, stable across runs and platforms
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
