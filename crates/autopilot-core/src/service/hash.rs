//! ContentHasher trait for computing content digests.
//!
//! Defined in autopilot-core so the engine can hash step inputs and outputs
//! without coupling to a specific algorithm. The `Sha256ContentHasher`
//! adapter lives in autopilot-infra.

/// Abstraction over content hashing.
///
/// Used for idempotency keys, input hashes and output hashes. Implementations
/// must be deterministic: equal input always yields an equal digest.
pub trait ContentHasher: Send + Sync {
    /// Compute a hex-encoded hash of the given content.
    fn compute_hash(&self, content: &str) -> String;
}
