//! Expected step sequences supplied by the external scenario store.
//!
//! The core only ever reads a `ScenarioDefinition`; it never writes one.

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ScenarioError;

fn default_mandatory() -> bool {
    true
}

/// One expected step: what the technician triggers and how long it may take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioStep {
    pub step_id: String,
    pub name: String,
    /// Target activation time in seconds.
    pub expected_seconds: Decimal,
    #[serde(default = "default_mandatory")]
    pub mandatory: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioDefinition {
    pub scenario_id: String,
    #[serde(default)]
    pub name: String,
    /// Steps in the order the technician performs them.
    pub steps: Vec<ScenarioStep>,
}

impl ScenarioDefinition {
    /// Parse and validate a scenario from JSON.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ScenarioError> {
        let scenario: ScenarioDefinition = serde_json::from_value(value.clone())
            .map_err(|e| ScenarioError::Malformed(e.to_string()))?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Reject duplicate step ids and negative expected times.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.scenario_id.trim().is_empty() {
            return Err(ScenarioError::Malformed("empty scenario_id".to_string()));
        }
        let mut seen = BTreeSet::new();
        for step in &self.steps {
            if !seen.insert(step.step_id.as_str()) {
                return Err(ScenarioError::DuplicateStep {
                    scenario_id: self.scenario_id.clone(),
                    step_id: step.step_id.clone(),
                });
            }
            if step.expected_seconds.is_sign_negative() {
                return Err(ScenarioError::NegativeExpectedTime {
                    scenario_id: self.scenario_id.clone(),
                    step_id: step.step_id.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn step(&self, step_id: &str) -> Option<&ScenarioStep> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.step(step_id).is_some()
    }

    pub fn mandatory_steps(&self) -> impl Iterator<Item = &ScenarioStep> {
        self.steps.iter().filter(|s| s.mandatory)
    }

    /// Position of a step in scenario order; unknown steps sort last.
    pub fn position(&self, step_id: &str) -> usize {
        self.steps
            .iter()
            .position(|s| s.step_id == step_id)
            .unwrap_or(usize::MAX)
    }
}
