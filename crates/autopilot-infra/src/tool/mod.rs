//! Tool adapters implementing `ToolInterface`.

pub mod simulated;
