//! Structured field and target names used in engine log lines.
//!
//! Usable as `tracing` field names and as `RUST_LOG` directives, e.g.
//! `RUST_LOG=audit=info` shows only the audit trail.

// --- Targets ---

/// Target of the audit trail written by the CLI's audit logger.
pub const AUDIT_TARGET: &str = "audit";

// --- Identity ---

pub const ORG_ID: &str = "org_id";
pub const WORKFLOW_ID: &str = "workflow_id";
pub const STEP: &str = "step";

// --- Execution ---

/// 1-based attempt number of a step invocation.
pub const ATTEMPT: &str = "attempt";

/// Failure class code (e.g. `TIMEOUT`).
pub const FAILURE_CLASS: &str = "class";

pub const DURATION_MS: &str = "duration_ms";

/// Default filter directives for a verbosity level (`-v` count).
pub fn default_filter(verbose: u8, quiet: bool) -> &'static str {
    match verbose {
        0 if quiet => "error",
        0 => "warn,audit=off",
        1 => "info,autopilot=debug,audit=info",
        _ => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_levels() {
        assert_eq!(default_filter(0, true), "error");
        assert!(default_filter(0, false).starts_with("warn"));
        assert!(default_filter(1, false).contains("audit=info"));
        assert_eq!(default_filter(3, false), "trace");
    }
}
