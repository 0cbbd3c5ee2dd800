//! Simulated data-warehouse tool.
//!
//! Produces deterministic, well-typed outputs for every step kind and lets
//! operators inject failures per step (`step=class[:times]`). Injections are
//! counted per workflow, so every workflow of a batch sees the same script.
//! A `TIMEOUT` injection is not applied to sampled requests, which is how a
//! timed-out scan recovers once the executor switches to sampling.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use autopilot_core::workflow::tool::{ToolFailure, ToolInterface, ToolRequest};
use autopilot_types::failure::FailureClass;
use autopilot_types::payload::{StepInput, StepOutput};
use dashmap::DashMap;
use uuid::Uuid;

/// Fail `step` with `class` for its first `times` invocations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureInjection {
    pub step: String,
    pub class: FailureClass,
    pub times: u32,
}

impl FromStr for FailureInjection {
    type Err = String;

    /// Parses `step=class` or `step=class:times`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (step, rest) = s
            .split_once('=')
            .ok_or_else(|| format!("expected step=class[:times], got '{s}'"))?;
        let step = step.trim();
        if step.is_empty() {
            return Err(format!("missing step name in '{s}'"));
        }

        let (class, times) = match rest.split_once(':') {
            Some((class, times)) => {
                let times = times
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| format!("invalid failure count in '{s}'"))?;
                (class, times)
            }
            None => (rest, 1),
        };

        Ok(Self {
            step: step.to_string(),
            class: class.parse()?,
            times,
        })
    }
}

impl fmt::Display for FailureInjection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}:{}", self.step, self.class, self.times)
    }
}

/// `ToolInterface` backed by canned outputs and an injected failure script.
#[derive(Debug, Default)]
pub struct SimulatedTool {
    injections: Vec<FailureInjection>,
    latency: Duration,
    /// Injected failures already served, per workflow and step.
    served: DashMap<(Uuid, String), u32>,
}

impl SimulatedTool {
    pub fn new(injections: Vec<FailureInjection>) -> Self {
        Self {
            injections,
            ..Self::default()
        }
    }

    /// Delay every invocation by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn next_failure(&self, request: &ToolRequest) -> Option<FailureClass> {
        let injection = self.injections.iter().find(|i| i.step == request.step_name)?;
        if injection.class == FailureClass::Timeout && request.sampled {
            return None;
        }

        let mut served = self
            .served
            .entry((request.workflow_id, request.step_name.clone()))
            .or_insert(0);
        if *served >= injection.times {
            return None;
        }
        *served += 1;
        Some(injection.class)
    }
}

impl ToolInterface for SimulatedTool {
    async fn invoke(&self, request: ToolRequest) -> Result<StepOutput, ToolFailure> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let output = canned_output(&request);
        let Some(class) = self.next_failure(&request) else {
            return Ok(output);
        };

        tracing::debug!(
            workflow_id = %request.workflow_id,
            step = %request.step_name,
            attempt = request.attempt,
            class = %class,
            "injecting simulated failure"
        );
        Err(match class {
            FailureClass::PartialResults => {
                ToolFailure::partial(output, "2 of 6 tables could not be read")
            }
            // Classified from the error text, the way a warehouse driver error would be.
            class => ToolFailure::from_message(failure_detail(class, &request)),
        })
    }
}

fn failure_detail(class: FailureClass, request: &ToolRequest) -> String {
    match class {
        FailureClass::Timeout => format!("query for {} timed out", request.step_name),
        FailureClass::QuotaExceeded => "query would exceed the bytes billed limit".to_string(),
        FailureClass::PermissionDenied => "403 access denied for warehouse connection".to_string(),
        FailureClass::TransientError => "connection reset by peer".to_string(),
        FailureClass::MalformedResponse => "unexpected response: unparseable row set".to_string(),
        FailureClass::ValidationFailed => "request rejected by schema validation".to_string(),
        FailureClass::PartialResults => "partial results".to_string(),
    }
}

/// Deterministic output for the request's input.
fn canned_output(request: &ToolRequest) -> StepOutput {
    let sampled = request.sampled || request.input.is_sampled();
    match &request.input {
        StepInput::IntrospectSchemas { .. } => StepOutput::IntrospectSchemas {
            datasets: 2,
            tables: 6,
            cache_hit: request.attempt > 1,
        },
        StepInput::ProfileTables { .. } => StepOutput::ProfileTables {
            profiled_tables: 6,
            sampled,
        },
        StepInput::ProfileColumns { .. } => StepOutput::ProfileColumns {
            profiled_columns: if sampled { 48 } else { 53 },
            sampled,
        },
        StepInput::DetectPii { min_confidence } => StepOutput::DetectPii {
            high_confidence: vec!["crm.contacts.email".to_string()],
            low_confidence: if *min_confidence > 90 {
                vec!["crm.contacts.phone".to_string()]
            } else {
                Vec::new()
            },
        },
        StepInput::RecommendStarters { max_tables } => StepOutput::RecommendStarters {
            tables: ["sales.orders", "sales.customers", "crm.contacts"]
                .iter()
                .take(*max_tables as usize)
                .map(|t| t.to_string())
                .collect(),
        },
        StepInput::StoreCatalog { connection_id } => StepOutput::StoreCatalog {
            stored: true,
            connection_id: connection_id.clone(),
        },
        StepInput::LoadCatalog {} => StepOutput::LoadCatalog {
            tables: vec!["sales.orders".to_string(), "sales.customers".to_string()],
        },
        StepInput::SelectTemplate { include_revenue } => StepOutput::SelectTemplate {
            templates: if *include_revenue {
                vec!["revenue_overview".to_string(), "customer_growth".to_string()]
            } else {
                vec!["customer_growth".to_string()]
            },
        },
        StepInput::StoreArtifact { artifact } => StepOutput::StoreArtifact {
            artifact_id: format!("art_{}", &request.idempotency_key[..12.min(request.idempotency_key.len())]),
            artifact: *artifact,
        },
        StepInput::CollectKpis { window_days, .. } => StepOutput::CollectKpis {
            metrics: BTreeMap::from([
                ("active_customers".to_string(), 412.0),
                ("revenue".to_string(), 18_250.0 * f64::from(*window_days) / 28.0),
            ]),
            sampled,
        },
        StepInput::DraftMemo { max_words } => StepOutput::DraftMemo {
            headline: "Revenue steady, active customers up 4%".to_string(),
            word_count: (*max_words).min(320),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_core::workflow::context::StepContext;
    use autopilot_types::payload::SampleScope;

    fn request(workflow_id: Uuid, step: &str, input: StepInput, sampled: bool) -> ToolRequest {
        ToolRequest {
            org_id: "org_acme".to_string(),
            workflow_id,
            step_name: step.to_string(),
            input,
            sampled,
            side_effecting: false,
            idempotency_key: "0123456789abcdef0123".to_string(),
            attempt: 1,
            context: StepContext::new(),
        }
    }

    #[test]
    fn test_parse_injection() {
        let parsed: FailureInjection = "select_template=malformed_response".parse().unwrap();
        assert_eq!(parsed.step, "select_template");
        assert_eq!(parsed.class, FailureClass::MalformedResponse);
        assert_eq!(parsed.times, 1);

        let parsed: FailureInjection = "profile_tables=TIMEOUT:2".parse().unwrap();
        assert_eq!(parsed.class, FailureClass::Timeout);
        assert_eq!(parsed.times, 2);

        assert!("profile_tables".parse::<FailureInjection>().is_err());
        assert!("=timeout".parse::<FailureInjection>().is_err());
        assert!("x=exploded".parse::<FailureInjection>().is_err());
        assert!("x=timeout:many".parse::<FailureInjection>().is_err());
    }

    #[tokio::test]
    async fn test_outputs_match_input_kind() {
        let tool = SimulatedTool::default();
        let inputs = [
            StepInput::IntrospectSchemas {
                connection_id: "conn_acme".to_string(),
            },
            StepInput::ProfileColumns {
                sample: SampleScope::Full,
            },
            StepInput::LoadCatalog {},
            StepInput::CollectKpis {
                window_days: 28,
                sample: SampleScope::Full,
            },
            StepInput::DraftMemo { max_words: 400 },
        ];
        for input in inputs {
            let req = request(Uuid::now_v7(), "step", input.clone(), false);
            let output = tool.invoke(req).await.unwrap();
            assert!(input.accepts(&output), "{input:?} produced {output:?}");
        }
    }

    #[tokio::test]
    async fn test_injection_counts_per_workflow() {
        let tool = SimulatedTool::new(vec!["load_catalog=transient_error:2".parse().unwrap()]);
        let first = Uuid::now_v7();
        let second = Uuid::now_v7();

        for _ in 0..2 {
            let err = tool
                .invoke(request(first, "load_catalog", StepInput::LoadCatalog {}, false))
                .await
                .unwrap_err();
            assert_eq!(err.class, FailureClass::TransientError);
        }
        assert!(
            tool.invoke(request(first, "load_catalog", StepInput::LoadCatalog {}, false))
                .await
                .is_ok()
        );
        assert!(
            tool.invoke(request(second, "load_catalog", StepInput::LoadCatalog {}, false))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_timeout_not_injected_into_sampled_requests() {
        let tool = SimulatedTool::new(vec!["profile_tables=timeout:5".parse().unwrap()]);
        let id = Uuid::now_v7();
        let input = StepInput::ProfileTables {
            sample: SampleScope::Full,
        };

        let err = tool
            .invoke(request(id, "profile_tables", input.clone(), false))
            .await
            .unwrap_err();
        assert_eq!(err.class, FailureClass::Timeout);

        let output = tool
            .invoke(request(id, "profile_tables", input.sampled(), true))
            .await
            .unwrap();
        assert_eq!(
            output,
            StepOutput::ProfileTables {
                profiled_tables: 6,
                sampled: true
            }
        );
    }

    #[tokio::test]
    async fn test_partial_results_carry_output() {
        let tool = SimulatedTool::new(vec!["detect_pii=partial_results".parse().unwrap()]);
        let err = tool
            .invoke(request(
                Uuid::now_v7(),
                "detect_pii",
                StepInput::DetectPii { min_confidence: 80 },
                false,
            ))
            .await
            .unwrap_err();
        assert_eq!(err.class, FailureClass::PartialResults);
        assert!(err.partial_output.is_some());
    }

    #[tokio::test]
    async fn test_injected_error_text_classifies_as_injected_class() {
        for class in FailureClass::ALL {
            let tool = SimulatedTool::new(vec![FailureInjection {
                step: "profile_tables".to_string(),
                class,
                times: 1,
            }]);
            let err = tool
                .invoke(request(
                    Uuid::now_v7(),
                    "profile_tables",
                    StepInput::ProfileTables {
                        sample: SampleScope::Full,
                    },
                    false,
                ))
                .await
                .unwrap_err();
            assert_eq!(err.class, class, "{}", err.detail);
        }
    }
}
