//! Pre-flight gate implementations.

pub mod policy;
