//! Small service ports shared across the engine.

pub mod hash;
