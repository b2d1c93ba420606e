//! SequenceComparator: aligns the merged actual steps against the scenario.
//!
//! Deltas use only the device-reported `actual_duration`, which the device
//! measures with a monotonic timer. Wall-clock timestamps from different
//! clocks are never subtracted.

use std::collections::BTreeMap;

use ce_core::{CrdtDocument, ScenarioDefinition, ScenarioStep, StepRecord, StepStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::classify::{classify, DeviationCode, Severity};

/// A timing or activation mismatch for one scenario step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deviation {
    pub step_id: String,
    pub step_name: String,
    pub expected_seconds: Decimal,
    pub actual_seconds: Option<Decimal>,
    /// actual − expected; `null` when the step never activated.
    pub delta_seconds: Option<Decimal>,
    pub severity: Severity,
    pub code: Option<DeviationCode>,
    pub description: String,
}

impl Deviation {
    pub fn never_activated(&self) -> bool {
        self.delta_seconds.is_none()
    }
}

/// Compare the document against the scenario, resolving steps first.
pub fn compare(scenario: &ScenarioDefinition, merged: &CrdtDocument) -> Vec<Deviation> {
    compare_resolved(scenario, &merged.resolved_steps(Some(scenario)))
}

/// Compare already-resolved records against the scenario, in scenario order.
pub fn compare_resolved(
    scenario: &ScenarioDefinition,
    records: &BTreeMap<String, StepRecord>,
) -> Vec<Deviation> {
    scenario
        .steps
        .iter()
        .filter_map(|step| compare_step(step, records.get(&step.step_id)))
        .collect()
}

fn compare_step(step: &ScenarioStep, record: Option<&StepRecord>) -> Option<Deviation> {
    let actual = record
        .filter(|r| r.status == StepStatus::Completed)
        .and_then(|r| r.actual_duration);

    let Some(actual) = actual else {
        if !step.mandatory {
            return None;
        }
        let class = classify(None);
        return Some(Deviation {
            step_id: step.step_id.clone(),
            step_name: step.name.clone(),
            expected_seconds: step.expected_seconds,
            actual_seconds: None,
            delta_seconds: None,
            severity: class.severity,
            code: class.code,
            description: "component failed to activate".to_string(),
        });
    };

    let delta = actual - step.expected_seconds;
    if delta <= Decimal::ZERO {
        return None;
    }

    let class = classify(Some(delta));
    let description = match class.severity {
        Severity::None => format!(
            "{} completed {}s over target, within tolerance",
            step.name,
            delta.normalize()
        ),
        _ => format!(
            "{} delayed by {}s (expected {}s, actual {}s)",
            step.name,
            delta.normalize(),
            step.expected_seconds.normalize(),
            actual.normalize()
        ),
    };

    Some(Deviation {
        step_id: step.step_id.clone(),
        step_name: step.name.clone(),
        expected_seconds: step.expected_seconds,
        actual_seconds: Some(actual),
        delta_seconds: Some(delta),
        severity: class.severity,
        code: class.code,
        description,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ce_core::VectorClock;
    use std::str::FromStr;

    fn scenario() -> ScenarioDefinition {
        serde_json::from_value(serde_json::json!({
            "scenario_id": "panel",
            "steps": [
                {"step_id": "s1", "name": "Activate fire panel", "expected_seconds": "2.0"},
                {"step_id": "s2", "name": "Release door holders", "expected_seconds": "3.0"},
                {"step_id": "s3", "name": "Recall lifts", "expected_seconds": "1.0"},
                {"step_id": "s4", "name": "Optional beacon", "expected_seconds": "1.0", "mandatory": false}
            ]
        }))
        .unwrap()
    }

    fn record(step: &str, status: StepStatus, secs: Option<&str>) -> StepRecord {
        let mut r = StepRecord::new(
            step,
            "A",
            VectorClock::from_signed([("A", 1)]).unwrap(),
            "2025-03-01T10:00:00Z",
        )
        .with_status(status);
        if let Some(s) = secs {
            r = r.with_duration(Decimal::from_str(s).unwrap());
        }
        r
    }

    fn records(list: Vec<StepRecord>) -> BTreeMap<String, StepRecord> {
        list.into_iter().map(|r| (r.step_id.clone(), r)).collect()
    }

    #[test]
    fn missing_mandatory_step_is_critical_with_null_delta() {
        let recs = records(vec![
            record("s1", StepStatus::Completed, Some("2.0")),
            record("s2", StepStatus::Completed, Some("3.0")),
        ]);
        let devs = compare_resolved(&scenario(), &recs);
        assert_eq!(devs.len(), 1);
        assert_eq!(devs[0].step_id, "s3");
        assert_eq!(devs[0].severity, Severity::Critical);
        assert!(devs[0].never_activated());
        assert_eq!(devs[0].description, "component failed to activate");
    }

    #[test]
    fn failed_or_pending_mandatory_step_never_activated() {
        let recs = records(vec![
            record("s1", StepStatus::Failed, Some("2.0")),
            record("s2", StepStatus::InProgress, None),
            record("s3", StepStatus::Completed, None),
        ]);
        let devs = compare_resolved(&scenario(), &recs);
        assert_eq!(devs.len(), 3);
        assert!(devs.iter().all(|d| d.severity == Severity::Critical));
    }

    #[test]
    fn optional_step_absence_is_not_a_deviation() {
        let recs = records(vec![
            record("s1", StepStatus::Completed, Some("1.0")),
            record("s2", StepStatus::Completed, Some("3.0")),
            record("s3", StepStatus::Completed, Some("0.5")),
        ]);
        assert!(compare_resolved(&scenario(), &recs).is_empty());
    }

    #[test]
    fn optional_step_delay_is_still_classified() {
        let recs = records(vec![
            record("s1", StepStatus::Completed, Some("1.0")),
            record("s2", StepStatus::Completed, Some("3.0")),
            record("s3", StepStatus::Completed, Some("0.5")),
            record("s4", StepStatus::Completed, Some("5.0")),
        ]);
        let devs = compare_resolved(&scenario(), &recs);
        assert_eq!(devs.len(), 1);
        assert_eq!(devs[0].severity, Severity::Low);
    }

    #[test]
    fn deviations_follow_scenario_order_and_render_normalized() {
        let recs = records(vec![
            record("s3", StepStatus::Completed, Some("4.5")),
            record("s1", StepStatus::Completed, Some("2.5")),
            record("s2", StepStatus::Completed, Some("13.0")),
        ]);
        let devs = compare_resolved(&scenario(), &recs);
        let ids: Vec<&str> = devs.iter().map(|d| d.step_id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2", "s3"]);
        assert_eq!(devs[0].severity, Severity::None);
        assert_eq!(devs[1].severity, Severity::Medium);
        assert_eq!(
            devs[1].description,
            "Release door holders delayed by 10s (expected 3s, actual 13s)"
        );
        assert_eq!(devs[2].severity, Severity::Low);
    }
}
