//! Scenario definitions are reference data owned outside the sync path.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use ce_core::ScenarioDefinition;
use tracing::{debug, warn};

use crate::error::StorageError;

/// Read-only lookup of scenario definitions by id.
#[async_trait]
pub trait ScenarioSource: Send + Sync + 'static {
    async fn get_scenario(
        &self,
        scenario_id: &str,
    ) -> Result<Option<ScenarioDefinition>, StorageError>;

    async fn list_scenarios(&self) -> Result<Vec<ScenarioDefinition>, StorageError>;
}

/// Scenarios held in memory, typically loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticScenarios {
    scenarios: BTreeMap<String, ScenarioDefinition>,
}

impl StaticScenarios {
    pub fn new(scenarios: impl IntoIterator<Item = ScenarioDefinition>) -> Self {
        StaticScenarios {
            scenarios: scenarios
                .into_iter()
                .map(|s| (s.scenario_id.clone(), s))
                .collect(),
        }
    }

    /// Load every `*.json` file in `dir` as a scenario definition.
    ///
    /// A file that fails to parse or validate aborts the load; serving with
    /// a silently missing scenario would reject every merge for it.
    pub fn load_dir(dir: &Path) -> Result<Self, StorageError> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            StorageError::Backend(format!("cannot read scenario dir {}: {}", dir.display(), e))
        })?;

        let mut paths: Vec<_> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut scenarios = BTreeMap::new();
        for path in paths {
            let text = std::fs::read_to_string(&path).map_err(|e| {
                StorageError::Backend(format!("cannot read {}: {}", path.display(), e))
            })?;
            let value: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
                StorageError::Backend(format!("invalid JSON in {}: {}", path.display(), e))
            })?;
            let scenario = ScenarioDefinition::from_json(&value)
                .map_err(|e| StorageError::Backend(format!("{}: {}", path.display(), e)))?;
            debug!(scenario_id = %scenario.scenario_id, path = %path.display(), "loaded scenario");
            if let Some(previous) = scenarios.insert(scenario.scenario_id.clone(), scenario) {
                warn!(scenario_id = %previous.scenario_id, "duplicate scenario id; later file wins");
            }
        }
        Ok(StaticScenarios { scenarios })
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}

#[async_trait]
impl ScenarioSource for StaticScenarios {
    async fn get_scenario(
        &self,
        scenario_id: &str,
    ) -> Result<Option<ScenarioDefinition>, StorageError> {
        Ok(self.scenarios.get(scenario_id).cloned())
    }

    async fn list_scenarios(&self) -> Result<Vec<ScenarioDefinition>, StorageError> {
        Ok(self.scenarios.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"{
        "scenario_id": "panel",
        "name": "Panel basic",
        "steps": [{"step_id": "s1", "name": "Activate fire panel", "expected_seconds": "2.0"}]
    }"#;

    #[tokio::test]
    async fn load_dir_reads_json_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("panel.json"), SCENARIO).unwrap();
        std::fs::write(dir.path().join("README.md"), "not a scenario").unwrap();

        let source = StaticScenarios::load_dir(dir.path()).unwrap();
        assert_eq!(source.len(), 1);
        let panel = source.get_scenario("panel").await.unwrap().unwrap();
        assert_eq!(panel.steps.len(), 1);
        assert!(source.get_scenario("other").await.unwrap().is_none());
    }

    #[test]
    fn load_dir_rejects_invalid_scenarios() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("bad.json"),
            r#"{"scenario_id": "bad", "steps": [
                {"step_id": "s1", "name": "a", "expected_seconds": "1"},
                {"step_id": "s1", "name": "b", "expected_seconds": "1"}
            ]}"#,
        )
        .unwrap();
        let err = StaticScenarios::load_dir(dir.path()).unwrap_err();
        assert!(err.to_string().contains("duplicate step"));
    }
}
