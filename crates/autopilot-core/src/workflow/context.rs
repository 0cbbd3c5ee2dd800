//! Dependency context passed to a step: the stored outputs of earlier
//! successful steps.

use std::collections::BTreeMap;

use autopilot_types::payload::StepOutput;
use serde::{Deserialize, Serialize};

/// Outputs of completed steps, keyed by step name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepContext {
    outputs: BTreeMap<String, StepOutput>,
}

impl StepContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, step_name: &str, output: StepOutput) {
        self.outputs.insert(step_name.to_string(), output);
    }

    pub fn get(&self, step_name: &str) -> Option<&StepOutput> {
        self.outputs.get(step_name)
    }

    pub fn contains(&self, step_name: &str) -> bool {
        self.outputs.contains_key(step_name)
    }

    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}
