//! Typed step payloads.
//!
//! Each step kind of the fixed workflow templates has its own input and
//! output variant. Both enums are internally tagged by `kind` so stored JSON
//! is self-describing:
//!
//! ```json
//! { "kind": "profile_tables", "sample": { "mode": "sampled", "percent": 10 } }
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Percentage used by the sampling-reduced request shape.
pub const REDUCED_SAMPLE_PERCENT: u8 = 10;

/// Maximum length of an output summary shown in recovery reports.
pub const OUTPUT_SUMMARY_MAX_CHARS: usize = 180;

// ---------------------------------------------------------------------------
// Step kinds
// ---------------------------------------------------------------------------

/// Discriminant shared by [`StepInput`] and [`StepOutput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    IntrospectSchemas,
    ProfileTables,
    ProfileColumns,
    DetectPii,
    RecommendStarters,
    StoreCatalog,
    LoadCatalog,
    SelectTemplate,
    StoreArtifact,
    CollectKpis,
    DraftMemo,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::IntrospectSchemas => "introspect_schemas",
            StepKind::ProfileTables => "profile_tables",
            StepKind::ProfileColumns => "profile_columns",
            StepKind::DetectPii => "detect_pii",
            StepKind::RecommendStarters => "recommend_starters",
            StepKind::StoreCatalog => "store_catalog",
            StepKind::LoadCatalog => "load_catalog",
            StepKind::SelectTemplate => "select_template",
            StepKind::StoreArtifact => "store_artifact",
            StepKind::CollectKpis => "collect_kpis",
            StepKind::DraftMemo => "draft_memo",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Sampling
// ---------------------------------------------------------------------------

/// How much of the source data a profiling-style step reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SampleScope {
    Full,
    Sampled { percent: u8 },
}

impl SampleScope {
    pub fn is_sampled(&self) -> bool {
        matches!(self, SampleScope::Sampled { .. })
    }
}

impl Default for SampleScope {
    fn default() -> Self {
        SampleScope::Full
    }
}

/// Kind of artifact persisted by a `store_artifact` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Dashboard,
    Memo,
}

// ---------------------------------------------------------------------------
// StepInput
// ---------------------------------------------------------------------------

/// Typed input payload of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepInput {
    IntrospectSchemas { connection_id: String },
    ProfileTables { sample: SampleScope },
    ProfileColumns { sample: SampleScope },
    DetectPii { min_confidence: u8 },
    RecommendStarters { max_tables: u32 },
    StoreCatalog { connection_id: String },
    LoadCatalog {},
    SelectTemplate { include_revenue: bool },
    StoreArtifact { artifact: ArtifactKind },
    CollectKpis { window_days: u32, sample: SampleScope },
    DraftMemo { max_words: u32 },
}

impl StepInput {
    pub fn kind(&self) -> StepKind {
        match self {
            StepInput::IntrospectSchemas { .. } => StepKind::IntrospectSchemas,
            StepInput::ProfileTables { .. } => StepKind::ProfileTables,
            StepInput::ProfileColumns { .. } => StepKind::ProfileColumns,
            StepInput::DetectPii { .. } => StepKind::DetectPii,
            StepInput::RecommendStarters { .. } => StepKind::RecommendStarters,
            StepInput::StoreCatalog { .. } => StepKind::StoreCatalog,
            StepInput::LoadCatalog {} => StepKind::LoadCatalog,
            StepInput::SelectTemplate { .. } => StepKind::SelectTemplate,
            StepInput::StoreArtifact { .. } => StepKind::StoreArtifact,
            StepInput::CollectKpis { .. } => StepKind::CollectKpis,
            StepInput::DraftMemo { .. } => StepKind::DraftMemo,
        }
    }

    /// The sampling-reduced request shape for this input.
    ///
    /// Inputs without a sample scope are returned unchanged.
    pub fn sampled(&self) -> StepInput {
        let reduced = SampleScope::Sampled {
            percent: REDUCED_SAMPLE_PERCENT,
        };
        match self {
            StepInput::ProfileTables { .. } => StepInput::ProfileTables { sample: reduced },
            StepInput::ProfileColumns { .. } => StepInput::ProfileColumns { sample: reduced },
            StepInput::CollectKpis { window_days, .. } => StepInput::CollectKpis {
                window_days: *window_days,
                sample: reduced,
            },
            other => other.clone(),
        }
    }

    /// Whether the input reads a reduced sample.
    pub fn is_sampled(&self) -> bool {
        match self {
            StepInput::ProfileTables { sample }
            | StepInput::ProfileColumns { sample }
            | StepInput::CollectKpis { sample, .. } => sample.is_sampled(),
            _ => false,
        }
    }

    /// Schema validation applied before any tool invocation.
    pub fn validate(&self) -> Result<(), String> {
        let check_sample = |sample: &SampleScope| match sample {
            SampleScope::Sampled { percent } if *percent == 0 || *percent > 100 => {
                Err(format!("sample percent must be within 1..=100, got {percent}"))
            }
            _ => Ok(()),
        };

        match self {
            StepInput::IntrospectSchemas { connection_id }
            | StepInput::StoreCatalog { connection_id } => {
                if connection_id.trim().is_empty() {
                    return Err("connection_id must not be empty".to_string());
                }
                Ok(())
            }
            StepInput::ProfileTables { sample } | StepInput::ProfileColumns { sample } => {
                check_sample(sample)
            }
            StepInput::DetectPii { min_confidence } => {
                if *min_confidence > 100 {
                    return Err(format!("min_confidence must be <= 100, got {min_confidence}"));
                }
                Ok(())
            }
            StepInput::RecommendStarters { max_tables } => {
                if *max_tables == 0 {
                    return Err("max_tables must be at least 1".to_string());
                }
                Ok(())
            }
            StepInput::CollectKpis {
                window_days,
                sample,
            } => {
                if *window_days == 0 {
                    return Err("window_days must be at least 1".to_string());
                }
                check_sample(sample)
            }
            StepInput::DraftMemo { max_words } => {
                if *max_words < 50 {
                    return Err(format!("max_words must be at least 50, got {max_words}"));
                }
                Ok(())
            }
            StepInput::LoadCatalog {}
            | StepInput::SelectTemplate { .. }
            | StepInput::StoreArtifact { .. } => Ok(()),
        }
    }

    /// Whether `output` is the variant this input's step kind produces.
    pub fn accepts(&self, output: &StepOutput) -> bool {
        self.kind() == output.kind()
    }
}

// ---------------------------------------------------------------------------
// StepOutput
// ---------------------------------------------------------------------------

/// Typed output payload of a successful step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepOutput {
    IntrospectSchemas {
        datasets: u32,
        tables: u32,
        cache_hit: bool,
    },
    ProfileTables {
        profiled_tables: u32,
        sampled: bool,
    },
    ProfileColumns {
        profiled_columns: u32,
        sampled: bool,
    },
    DetectPii {
        high_confidence: Vec<String>,
        low_confidence: Vec<String>,
    },
    RecommendStarters {
        tables: Vec<String>,
    },
    StoreCatalog {
        stored: bool,
        connection_id: String,
    },
    LoadCatalog {
        tables: Vec<String>,
    },
    SelectTemplate {
        templates: Vec<String>,
    },
    StoreArtifact {
        artifact_id: String,
        artifact: ArtifactKind,
    },
    CollectKpis {
        metrics: BTreeMap<String, f64>,
        sampled: bool,
    },
    DraftMemo {
        headline: String,
        word_count: u32,
    },
}

impl StepOutput {
    pub fn kind(&self) -> StepKind {
        match self {
            StepOutput::IntrospectSchemas { .. } => StepKind::IntrospectSchemas,
            StepOutput::ProfileTables { .. } => StepKind::ProfileTables,
            StepOutput::ProfileColumns { .. } => StepKind::ProfileColumns,
            StepOutput::DetectPii { .. } => StepKind::DetectPii,
            StepOutput::RecommendStarters { .. } => StepKind::RecommendStarters,
            StepOutput::StoreCatalog { .. } => StepKind::StoreCatalog,
            StepOutput::LoadCatalog { .. } => StepKind::LoadCatalog,
            StepOutput::SelectTemplate { .. } => StepKind::SelectTemplate,
            StepOutput::StoreArtifact { .. } => StepKind::StoreArtifact,
            StepOutput::CollectKpis { .. } => StepKind::CollectKpis,
            StepOutput::DraftMemo { .. } => StepKind::DraftMemo,
        }
    }

    /// Compact JSON rendering, truncated for display in recovery reports.
    pub fn summary(&self) -> String {
        let full = serde_json::to_string(self).unwrap_or_default();
        if full.chars().count() <= OUTPUT_SUMMARY_MAX_CHARS {
            full
        } else {
            full.chars().take(OUTPUT_SUMMARY_MAX_CHARS).collect()
        }
    }
}
