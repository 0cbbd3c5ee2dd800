//! Step catalogs for the fixed workflow templates.

use autopilot_types::payload::{ArtifactKind, SampleScope, StepInput};
use autopilot_types::workflow::{FailurePolicy, StepDefinition, WorkflowTemplate};

fn step(name: &str, depends_on: &[&str], input: StepInput) -> StepDefinition {
    StepDefinition {
        name: name.to_string(),
        depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
        side_effecting: false,
        on_failure: FailurePolicy::DeadLetter,
        timeout_secs: None,
        input,
    }
}

/// Expand a template into its ordered step definitions for `org_id`.
pub fn build_steps(template: WorkflowTemplate, org_id: &str) -> Vec<StepDefinition> {
    let connection_id = format!("conn_{org_id}");
    match template {
        WorkflowTemplate::Profile => vec![
            step(
                "introspect_schemas",
                &[],
                StepInput::IntrospectSchemas {
                    connection_id: connection_id.clone(),
                },
            ),
            step(
                "profile_tables",
                &["introspect_schemas"],
                StepInput::ProfileTables {
                    sample: SampleScope::Full,
                },
            ),
            StepDefinition {
                on_failure: FailurePolicy::SkipAndContinue,
                ..step(
                    "profile_columns",
                    &["introspect_schemas"],
                    StepInput::ProfileColumns {
                        sample: SampleScope::Full,
                    },
                )
            },
            StepDefinition {
                on_failure: FailurePolicy::SkipAndContinue,
                ..step(
                    "detect_pii",
                    &["introspect_schemas"],
                    StepInput::DetectPii { min_confidence: 80 },
                )
            },
            step(
                "recommend_starters",
                &["introspect_schemas"],
                StepInput::RecommendStarters { max_tables: 5 },
            ),
            StepDefinition {
                side_effecting: true,
                ..step(
                    "store_catalog",
                    &["introspect_schemas", "profile_tables", "recommend_starters"],
                    StepInput::StoreCatalog { connection_id },
                )
            },
        ],
        WorkflowTemplate::Dashboard => vec![
            step("load_catalog", &[], StepInput::LoadCatalog {}),
            step(
                "select_template",
                &["load_catalog"],
                StepInput::SelectTemplate {
                    include_revenue: true,
                },
            ),
            StepDefinition {
                side_effecting: true,
                ..step(
                    "store_artifact",
                    &["select_template"],
                    StepInput::StoreArtifact {
                        artifact: ArtifactKind::Dashboard,
                    },
                )
            },
        ],
        WorkflowTemplate::Memo => vec![
            step(
                "collect_kpis",
                &[],
                StepInput::CollectKpis {
                    window_days: 28,
                    sample: SampleScope::Full,
                },
            ),
            step(
                "draft_memo",
                &["collect_kpis"],
                StepInput::DraftMemo { max_words: 400 },
            ),
            StepDefinition {
                side_effecting: true,
                ..step(
                    "store_artifact",
                    &["draft_memo"],
                    StepInput::StoreArtifact {
                        artifact: ArtifactKind::Memo,
                    },
                )
            },
        ],
    }
}

/// Check that step names are unique and every dependency names an earlier step.
pub fn validate_steps(steps: &[StepDefinition]) -> Result<(), String> {
    if steps.is_empty() {
        return Err("workflow has no steps".to_string());
    }
    for (index, step) in steps.iter().enumerate() {
        let earlier = &steps[..index];
        if earlier.iter().any(|s| s.name == step.name) {
            return Err(format!("duplicate step name '{}'", step.name));
        }
        for dep in &step.depends_on {
            if !earlier.iter().any(|s| &s.name == dep) {
                return Err(format!(
                    "step '{}' depends on '{dep}', which is not an earlier step",
                    step.name
                ));
            }
        }
    }
    Ok(())
}
