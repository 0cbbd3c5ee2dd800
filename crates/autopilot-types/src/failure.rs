//! Failure taxonomy for step execution.
//!
//! Every raw tool or step outcome that is not a clean success is mapped to
//! exactly one [`FailureClass`]. Each class carries a static policy
//! ([`RetryDisposition`]) that the step executor follows.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Fixed set of failure classes a step outcome can be classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureClass {
    Timeout,
    QuotaExceeded,
    PermissionDenied,
    #[serde(alias = "TRANSIENT_NETWORK")]
    TransientError,
    MalformedResponse,
    PartialResults,
    ValidationFailed,
}

/// What the executor does after an attempt fails with a given class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    /// Retry the same request shape after backoff.
    Retry,
    /// Retry after backoff with the sampling-reduced request shape.
    RetryWithSampling,
    /// Stop immediately; the step is failed.
    Terminal,
    /// Not a failure: keep the output and surface a warning.
    Warn,
}

impl FailureClass {
    /// All classes, in a stable order.
    pub const ALL: [FailureClass; 7] = [
        FailureClass::Timeout,
        FailureClass::QuotaExceeded,
        FailureClass::PermissionDenied,
        FailureClass::TransientError,
        FailureClass::MalformedResponse,
        FailureClass::PartialResults,
        FailureClass::ValidationFailed,
    ];

    /// Static retry policy for this class.
    pub fn disposition(self) -> RetryDisposition {
        match self {
            FailureClass::Timeout => RetryDisposition::RetryWithSampling,
            FailureClass::TransientError => RetryDisposition::Retry,
            FailureClass::PartialResults => RetryDisposition::Warn,
            FailureClass::QuotaExceeded
            | FailureClass::PermissionDenied
            | FailureClass::MalformedResponse
            | FailureClass::ValidationFailed => RetryDisposition::Terminal,
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(
            self.disposition(),
            RetryDisposition::Retry | RetryDisposition::RetryWithSampling
        )
    }

    pub fn is_terminal(self) -> bool {
        self.disposition() == RetryDisposition::Terminal
    }

    /// Wire/storage code, e.g. `"QUOTA_EXCEEDED"`.
    pub fn code(self) -> &'static str {
        match self {
            FailureClass::Timeout => "TIMEOUT",
            FailureClass::QuotaExceeded => "QUOTA_EXCEEDED",
            FailureClass::PermissionDenied => "PERMISSION_DENIED",
            FailureClass::TransientError => "TRANSIENT_ERROR",
            FailureClass::MalformedResponse => "MALFORMED_RESPONSE",
            FailureClass::PartialResults => "PARTIAL_RESULTS",
            FailureClass::ValidationFailed => "VALIDATION_FAILED",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for FailureClass {
    type Err = String;

    /// Accepts both the storage code (`TRANSIENT_ERROR`) and the lowercase
    /// form used on the command line (`transient_error`, `transient-error`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace('-', "_").as_str() {
            "TIMEOUT" => Ok(FailureClass::Timeout),
            "QUOTA_EXCEEDED" => Ok(FailureClass::QuotaExceeded),
            "PERMISSION_DENIED" => Ok(FailureClass::PermissionDenied),
            "TRANSIENT_ERROR" | "TRANSIENT_NETWORK" => Ok(FailureClass::TransientError),
            "MALFORMED_RESPONSE" => Ok(FailureClass::MalformedResponse),
            "PARTIAL_RESULTS" => Ok(FailureClass::PartialResults),
            "VALIDATION_FAILED" => Ok(FailureClass::ValidationFailed),
            other => Err(format!("invalid failure class: '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classes() {
        assert!(FailureClass::Timeout.is_retryable());
        assert!(FailureClass::TransientError.is_retryable());
        assert!(!FailureClass::QuotaExceeded.is_retryable());
        assert!(!FailureClass::PartialResults.is_retryable());
    }

    #[test]
    fn test_terminal_classes() {
        for class in [
            FailureClass::QuotaExceeded,
            FailureClass::PermissionDenied,
            FailureClass::MalformedResponse,
            FailureClass::ValidationFailed,
        ] {
            assert!(class.is_terminal(), "{class} should be terminal");
        }
        assert!(!FailureClass::PartialResults.is_terminal());
    }

    #[test]
    fn test_timeout_asks_for_sampling() {
        assert_eq!(
            FailureClass::Timeout.disposition(),
            RetryDisposition::RetryWithSampling
        );
        assert_eq!(FailureClass::PartialResults.disposition(), RetryDisposition::Warn);
    }

    #[test]
    fn test_serde_uses_screaming_codes() {
        let json = serde_json::to_string(&FailureClass::QuotaExceeded).unwrap();
        assert_eq!(json, "\"QUOTA_EXCEEDED\"");

        let parsed: FailureClass = serde_json::from_str("\"TRANSIENT_NETWORK\"").unwrap();
        assert_eq!(parsed, FailureClass::TransientError);
    }

    #[test]
    fn test_from_str_accepts_cli_spelling() {
        assert_eq!("timeout".parse::<FailureClass>().unwrap(), FailureClass::Timeout);
        assert_eq!(
            "malformed-response".parse::<FailureClass>().unwrap(),
            FailureClass::MalformedResponse
        );
        assert!("exploded".parse::<FailureClass>().is_err());
    }

    #[test]
    fn test_display_matches_code() {
        for class in FailureClass::ALL {
            assert_eq!(class.to_string(), class.code());
            assert_eq!(class.code().parse::<FailureClass>().unwrap(), class);
        }
    }
}
