//! Infrastructure layer for Autopilot.
//!
//! Implements the ports defined in `autopilot-core`: SQLite-backed workflow
//! and dead-letter stores, SHA-256 content hashing, the config-driven
//! pre-flight gate and the simulated warehouse tool. Also owns data
//! directory resolution and `config.toml` loading.

pub mod config;
pub mod crypto;
pub mod gate;
pub mod sqlite;
pub mod tool;
