//! SHA-256 content hashing.
//!
//! Implements the `ContentHasher` trait from `autopilot-core` with the
//! `sha2` crate. Idempotency keys, workflow input hashes and step output
//! hashes are all computed through it.

use sha2::{Digest, Sha256};

use autopilot_core::service::hash::ContentHasher;

/// Lowercase hex SHA-256 implementation of `ContentHasher`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256ContentHasher;

impl Sha256ContentHasher {
    pub fn new() -> Self {
        Self
    }
}

impl ContentHasher for Sha256ContentHasher {
    fn compute_hash(&self, content: &str) -> String {
        format!("{:x}", Sha256::digest(content.as_bytes()))
    }
}
