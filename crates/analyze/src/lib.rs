//! ce-analyze: deviation analysis for merged C&E session documents.
//!
//! The analyzer consumes a merged [`CrdtDocument`] and its
//! [`ScenarioDefinition`]. Each stage is a separate module:
//!
//! - [`compare`] -- SequenceComparator, actual vs. expected per step
//! - [`classify`] -- DeviationClassifier, delta to severity tier
//! - [`faults`] -- FaultGenerator, deviations to compliance faults
//!
//! [`analyze()`] runs all three and aggregates an [`AnalysisReport`],
//! including the final `overall_status`. [`merge_engine()`] builds a
//! [`MergeEngine`] whose merged status agrees with that report.

pub mod classify;
pub mod compare;
pub mod faults;
pub mod report;

use std::collections::BTreeMap;

use ce_core::{
    CrdtDocument, DeviationCheck, MergeEngine, OverallStatus, ScenarioDefinition, StepRecord,
};
use tracing::debug;

pub use classify::{classify, Classification, DeviationCode, Severity};
pub use compare::{compare, compare_resolved, Deviation};
pub use faults::{generate, Fault, FaultKey, FAULT_CATEGORY};
pub use report::{AnalysisReport, Finding, FindingSeverity};

/// Flags a session as deviating when any step's timing raises a fault.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimingCheck;

impl DeviationCheck for TimingCheck {
    fn deviations_found(
        &self,
        scenario: &ScenarioDefinition,
        resolved: &BTreeMap<String, StepRecord>,
    ) -> bool {
        compare::compare_resolved(scenario, resolved)
            .iter()
            .any(|d| d.severity.raises_fault())
    }
}

/// A merge engine for `scenario` that classifies deviations with [`TimingCheck`].
pub fn merge_engine(scenario: &ScenarioDefinition) -> MergeEngine<'_> {
    MergeEngine::new(scenario, &TimingCheck)
}

/// Run comparison, classification and fault generation on a merged document.
///
/// `overall_status` is `completed_with_deviations` when every mandatory step
/// completed and at least one fault-raising deviation was found.
pub fn analyze(scenario: &ScenarioDefinition, document: &CrdtDocument) -> AnalysisReport {
    let records = document.resolved_steps(Some(scenario));
    let deviations = compare::compare_resolved(scenario, &records);
    let faults = faults::generate(&document.document_id, &deviations, &records);
    let overall_status = OverallStatus::derive(scenario, &records, !faults.is_empty());

    debug!(
        document_id = %document.document_id,
        deviations = deviations.len(),
        faults = faults.len(),
        status = overall_status.as_str(),
        "analyzed session"
    );

    let mut report = AnalysisReport {
        document_id: document.document_id.clone(),
        scenario_id: scenario.scenario_id.clone(),
        overall_status,
        deviations,
        faults,
        findings: Vec::new(),
    };
    report.extract_findings(&records);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use ce_core::{StepRecord, StepStatus, VectorClock};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn scenario() -> ScenarioDefinition {
        serde_json::from_value(serde_json::json!({
            "scenario_id": "panel",
            "steps": [
                {"step_id": "s1", "name": "Activate fire panel", "expected_seconds": "2.0"},
                {"step_id": "s2", "name": "Release door holders", "expected_seconds": "3.0"},
                {"step_id": "s3", "name": "Recall lifts", "expected_seconds": "1.0"}
            ]
        }))
        .unwrap()
    }

    fn completed(doc: &mut CrdtDocument, step: &str, counter: i64, secs: &str) {
        doc.apply(
            StepRecord::new(
                step,
                "A",
                VectorClock::from_signed([("A", counter)]).unwrap(),
                "2025-03-01T10:00:00Z",
            )
            .with_status(StepStatus::Completed)
            .with_duration(Decimal::from_str(secs).unwrap()),
        );
    }

    #[test]
    fn end_to_end_three_step_scenario() {
        let mut doc = CrdtDocument::new("session-1", "panel");
        completed(&mut doc, "s1", 1, "2.5");
        completed(&mut doc, "s2", 2, "13.0");
        completed(&mut doc, "s3", 3, "1.0");

        let report = analyze(&scenario(), &doc);

        assert_eq!(report.deviations.len(), 2);
        assert_eq!(report.deviations[0].step_id, "s1");
        assert_eq!(report.deviations[0].severity, Severity::None);
        assert_eq!(report.deviations[1].step_id, "s2");
        assert_eq!(report.deviations[1].severity, Severity::Medium);
        assert_eq!(
            report.deviations[1].delta_seconds,
            Some(Decimal::from_str("10.0").unwrap())
        );

        assert_eq!(report.faults.len(), 1);
        assert_eq!(report.faults[0].severity, Severity::Medium);
        assert_eq!(
            report.faults[0].description,
            "C&E test deviation: Release door holders delayed by 10s (expected 3s, actual 13s)"
        );
        assert_eq!(report.overall_status, OverallStatus::CompletedWithDeviations);
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].kind, "within_tolerance");
    }

    #[test]
    fn never_activated_step_yields_exactly_one_critical() {
        let mut doc = CrdtDocument::new("session-1", "panel");
        completed(&mut doc, "s1", 1, "2.0");
        completed(&mut doc, "s3", 2, "1.0");

        let report = analyze(&scenario(), &doc);
        let critical: Vec<&Deviation> = report
            .deviations
            .iter()
            .filter(|d| d.severity == Severity::Critical)
            .collect();
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].step_id, "s2");
        assert_eq!(critical[0].delta_seconds, None);
        assert_eq!(report.overall_status, OverallStatus::InProgress);
    }

    #[test]
    fn on_time_session_is_completed() {
        let mut doc = CrdtDocument::new("session-1", "panel");
        completed(&mut doc, "s1", 1, "1.5");
        completed(&mut doc, "s2", 2, "3.0");
        completed(&mut doc, "s3", 3, "0.9");

        let report = analyze(&scenario(), &doc);
        assert!(report.deviations.is_empty());
        assert!(report.faults.is_empty());
        assert_eq!(report.overall_status, OverallStatus::Completed);
    }

    #[test]
    fn merged_status_matches_analysis() {
        let s = scenario();
        let mut late = CrdtDocument::new("session-1", "panel");
        completed(&mut late, "s1", 1, "15.0");
        let mut rest = CrdtDocument::new("session-1", "panel");
        completed(&mut rest, "s2", 2, "3.0");
        completed(&mut rest, "s3", 3, "1.0");

        let merged = merge_engine(&s).merge(&late, &rest).unwrap();
        let report = analyze(&s, &merged.document);
        assert_eq!(
            merged.document.overall_status,
            OverallStatus::CompletedWithDeviations
        );
        assert_eq!(merged.document.overall_status, report.overall_status);
    }

    #[test]
    fn delta_serializes_as_null_when_never_activated() {
        let doc = CrdtDocument::new("session-1", "panel");
        let report = analyze(&scenario(), &doc);
        let json = serde_json::to_value(&report.deviations[0]).unwrap();
        assert!(json["delta_seconds"].is_null());
        assert_eq!(json["severity"], "critical");
        assert_eq!(json["code"], "1A");
    }
}
