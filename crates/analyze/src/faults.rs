//! FaultGenerator: turns classified deviations into compliance fault records.
//!
//! Output is a pure function of its inputs: running it twice on the same
//! deviations yields byte-identical faults, so repeated syncs never produce
//! a second fault for the same `(session_id, step_id, severity)`.

use std::collections::BTreeMap;

use ce_core::StepRecord;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::classify::{DeviationCode, Severity};
use crate::compare::Deviation;

/// Fixed category for every fault this generator emits.
pub const FAULT_CATEGORY: &str = "ce_test_deviation";

/// A structured compliance fault handed to the external fault store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    /// Hex SHA-256 of the dedup key.
    pub fault_id: String,
    pub session_id: String,
    /// Step id of the deviation this fault was raised for.
    pub deviation_ref: String,
    pub severity: Severity,
    pub code: Option<DeviationCode>,
    pub category: String,
    pub description: String,
    pub evidence_refs: Vec<String>,
}

/// Identity under which the fault store deduplicates faults.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FaultKey {
    pub session_id: String,
    pub step_id: String,
    pub severity: Severity,
}

impl FaultKey {
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.session_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.step_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.severity.as_str().as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

impl Fault {
    pub fn dedup_key(&self) -> FaultKey {
        FaultKey {
            session_id: self.session_id.clone(),
            step_id: self.deviation_ref.clone(),
            severity: self.severity,
        }
    }
}

/// Render the fault description for a deviation.
pub fn describe(deviation: &Deviation) -> String {
    match (deviation.delta_seconds, deviation.actual_seconds) {
        (Some(delta), Some(actual)) => format!(
            "C&E test deviation: {} delayed by {}s (expected {}s, actual {}s)",
            deviation.step_name,
            delta.normalize(),
            deviation.expected_seconds.normalize(),
            actual.normalize()
        ),
        _ => format!(
            "C&E test deviation: {} component failed to activate",
            deviation.step_name
        ),
    }
}

/// Emit one fault per deviation above `Severity::None`, in deviation order.
///
/// `evidence_refs` are copied from the step's resolved record; a deviation
/// for a step that was never recorded carries no evidence.
pub fn generate(
    session_id: &str,
    deviations: &[Deviation],
    records: &BTreeMap<String, StepRecord>,
) -> Vec<Fault> {
    deviations
        .iter()
        .filter(|d| d.severity.raises_fault())
        .map(|d| {
            let key = FaultKey {
                session_id: session_id.to_string(),
                step_id: d.step_id.clone(),
                severity: d.severity,
            };
            Fault {
                fault_id: key.fingerprint(),
                session_id: key.session_id,
                deviation_ref: key.step_id,
                severity: d.severity,
                code: d.code,
                category: FAULT_CATEGORY.to_string(),
                description: describe(d),
                evidence_refs: records
                    .get(&d.step_id)
                    .map(|r| r.evidence_refs.iter().cloned().collect())
                    .unwrap_or_default(),
            }
        })
        .collect()
}
