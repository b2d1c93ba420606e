//! AnalysisReport: deviations, faults and review findings for one session.
//!
//! Findings collect the things a reviewer should look at that are not
//! faults: steps the scenario does not know, steps left in concurrent
//! conflict, and delays inside tolerance.

use std::collections::BTreeMap;

use ce_core::{OverallStatus, StepRecord};
use serde::{Deserialize, Serialize};

use crate::classify::Severity;
use crate::compare::Deviation;
use crate::faults::Fault;

/// Severity level for a review finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FindingSeverity {
    Info,
    Warning,
}

/// A notable observation from analysis that is not itself a fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: String,
    pub severity: FindingSeverity,
    pub message: String,
    pub step_id: Option<String>,
}

/// Aggregated analysis for one merged session document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub document_id: String,
    pub scenario_id: String,
    pub overall_status: OverallStatus,
    pub deviations: Vec<Deviation>,
    pub faults: Vec<Fault>,
    pub findings: Vec<Finding>,
}

impl AnalysisReport {
    /// Steps in concurrent-conflict state, in step-id order.
    pub fn review_required(&self) -> Vec<String> {
        self.findings
            .iter()
            .filter(|f| f.kind == "conflicting_outcomes")
            .filter_map(|f| f.step_id.clone())
            .collect()
    }

    /// Rebuild findings from deviations and resolved records.
    pub fn extract_findings(&mut self, records: &BTreeMap<String, StepRecord>) {
        self.findings.clear();

        for (step_id, record) in records {
            if record.conflicting_outcomes {
                self.findings.push(Finding {
                    kind: "conflicting_outcomes".to_string(),
                    severity: FindingSeverity::Warning,
                    message: format!(
                        "Step '{}' has concurrent writes with different outcomes; manual review required",
                        step_id
                    ),
                    step_id: Some(step_id.clone()),
                });
            }
            if record.unrecognized_step {
                self.findings.push(Finding {
                    kind: "unrecognized_step".to_string(),
                    severity: FindingSeverity::Warning,
                    message: format!(
                        "Step '{}' is not part of scenario '{}'; kept as recorded",
                        step_id, self.scenario_id
                    ),
                    step_id: Some(step_id.clone()),
                });
            }
        }

        for deviation in &self.deviations {
            if deviation.severity == Severity::None {
                self.findings.push(Finding {
                    kind: "within_tolerance".to_string(),
                    severity: FindingSeverity::Info,
                    message: deviation.description.clone(),
                    step_id: Some(deviation.step_id.clone()),
                });
            }
        }
    }
}
