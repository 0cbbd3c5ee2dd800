//! Cryptographic primitives.
//!
//! - `hash`: SHA-256 content hashing for idempotency keys and output hashes

pub mod hash;
