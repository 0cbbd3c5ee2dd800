//! Failure classifier.
//!
//! Turns the raw outcome of one attempt into an explicit [`AttemptResult`]
//! (success, retryable error, terminal error). The executor branches on the
//! result; nothing on the expected retry path is an `Err`.

use std::time::Duration;

use autopilot_types::failure::{FailureClass, RetryDisposition};
use autopilot_types::payload::{StepInput, StepOutput};
use autopilot_types::workflow::AttemptOutcome;

use super::sanitize::sanitize_error;
use super::tool::ToolFailure;

/// What came back from one tool invocation.
#[derive(Debug)]
pub enum RawOutcome {
    Completed(Result<StepOutput, ToolFailure>),
    /// The step timeout elapsed before the tool answered.
    TimedOut(Duration),
}

/// Classified outcome of one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptResult {
    Success {
        output: StepOutput,
        warnings: Vec<String>,
    },
    Retryable {
        class: FailureClass,
        message: String,
    },
    Terminal {
        class: FailureClass,
        message: String,
    },
}

impl AttemptResult {
    pub fn outcome(&self) -> AttemptOutcome {
        match self {
            AttemptResult::Success { .. } => AttemptOutcome::Success,
            AttemptResult::Retryable { .. } => AttemptOutcome::Retryable,
            AttemptResult::Terminal { .. } => AttemptOutcome::Terminal,
        }
    }

    pub fn class(&self) -> Option<FailureClass> {
        match self {
            AttemptResult::Success { .. } => None,
            AttemptResult::Retryable { class, .. } | AttemptResult::Terminal { class, .. } => {
                Some(*class)
            }
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            AttemptResult::Success { .. } => None,
            AttemptResult::Retryable { message, .. } | AttemptResult::Terminal { message, .. } => {
                Some(message)
            }
        }
    }
}

/// Stateless classifier; all logic is in associated functions.
pub struct FailureClassifier;

impl FailureClassifier {
    /// Classify one attempt of a step declared with `input`.
    pub fn classify(input: &StepInput, raw: RawOutcome) -> AttemptResult {
        match raw {
            RawOutcome::TimedOut(limit) => AttemptResult::Retryable {
                class: FailureClass::Timeout,
                message: format!("step timed out after {}s", limit.as_secs()),
            },
            RawOutcome::Completed(Ok(output)) => Self::check_output(input, output, Vec::new()),
            RawOutcome::Completed(Err(failure)) => Self::classify_failure(input, failure),
        }
    }

    fn classify_failure(input: &StepInput, failure: ToolFailure) -> AttemptResult {
        let message = sanitize_error(&failure.detail);
        match failure.class.disposition() {
            RetryDisposition::Retry | RetryDisposition::RetryWithSampling => {
                AttemptResult::Retryable {
                    class: failure.class,
                    message,
                }
            }
            RetryDisposition::Terminal => AttemptResult::Terminal {
                class: failure.class,
                message,
            },
            RetryDisposition::Warn => match failure.partial_output {
                Some(output) => {
                    let warning = format!("{}: {message}", FailureClass::PartialResults);
                    Self::check_output(input, output, vec![warning])
                }
                None => AttemptResult::Terminal {
                    class: FailureClass::MalformedResponse,
                    message: format!("partial results reported without a payload: {message}"),
                },
            },
        }
    }

    fn check_output(input: &StepInput, output: StepOutput, warnings: Vec<String>) -> AttemptResult {
        if input.accepts(&output) {
            AttemptResult::Success { output, warnings }
        } else {
            AttemptResult::Terminal {
                class: FailureClass::MalformedResponse,
                message: format!(
                    "expected {} output, tool returned {}",
                    input.kind(),
                    output.kind()
                ),
            }
        }
    }

    /// Best-effort class for untyped error text.
    ///
    /// Unknown errors are treated as transient so they get the retry budget.
    pub fn classify_message(message: &str) -> FailureClass {
        let lower = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if has(&["timeout", "timed out", "deadline exceeded"]) {
            FailureClass::Timeout
        } else if has(&["quota", "bytes billed", "billing limit"]) {
            FailureClass::QuotaExceeded
        } else if has(&["permission", "forbidden", "access denied", "unauthorized", "403", "401"]) {
            FailureClass::PermissionDenied
        } else if has(&["malformed", "invalid json", "unexpected response", "parse error"]) {
            FailureClass::MalformedResponse
        } else if has(&["partial"]) {
            FailureClass::PartialResults
        } else if has(&["validation", "invalid input", "schema mismatch"]) {
            FailureClass::ValidationFailed
        } else {
            FailureClass::TransientError
        }
    }
}
