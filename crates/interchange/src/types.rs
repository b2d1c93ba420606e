//! Typed structs for the merge request/response wire format.
//!
//! Request types mirror the JSON a device sends verbatim, so a request that
//! fails to sync can be handed back to the caller byte-for-byte. Signed
//! clock counters and free-form change `data` are only interpreted during
//! validation (see [`crate::deserialize`]).

use std::collections::BTreeMap;

use ce_analyze::{AnalysisReport, Deviation, DeviationCode, Fault, Severity};
use ce_core::{MergeOutcome, OverallStatus, StepRecord, VectorClock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Identity of the device (actor) that produced a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub actor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
}

/// One step update as recorded on the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub step_id: String,
    #[serde(rename = "type")]
    pub change_type: String,
    /// Device wall clock, RFC 3339. Audit ordering only.
    pub timestamp: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// A batch of offline changes for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub document_id: String,
    #[serde(default)]
    pub scenario_id: String,
    /// Device clock after the batch, as sent (counters not yet validated).
    pub vector_clock: BTreeMap<String, i64>,
    #[serde(default)]
    pub changes: Vec<Change>,
    pub device_info: DeviceInfo,
}

/// Recognized change types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Started {
        started_at: String,
    },
    Completed {
        completed_at: String,
        actual_duration: Decimal,
    },
    Failed {
        completed_at: Option<String>,
        actual_duration: Option<Decimal>,
    },
    Skipped,
    NotesSet {
        notes: String,
    },
    EvidenceLinked {
        evidence_id: String,
    },
}

/// A change that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepChange {
    pub step_id: String,
    pub timestamp: String,
    /// `timestamp` as nanoseconds since the epoch.
    pub timestamp_nanos: i128,
    pub kind: ChangeKind,
}

/// A request whose clock, timestamps and change payloads are well formed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    pub document_id: String,
    pub scenario_id: String,
    pub actor_id: String,
    pub clock: VectorClock,
    pub changes: Vec<StepChange>,
}

/// Outcome of a submission from the caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    Merged,
    Queued,
    SyncFailed,
}

/// Resolved view of a session document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDocument {
    pub document_id: String,
    pub scenario_id: String,
    pub vector_clock: VectorClock,
    pub steps: BTreeMap<String, StepRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviationPayload {
    pub step_id: String,
    pub deviation_seconds: Option<Decimal>,
    pub severity: Severity,
    pub code: Option<DeviationCode>,
    pub description: String,
}

impl From<&Deviation> for DeviationPayload {
    fn from(d: &Deviation) -> Self {
        DeviationPayload {
            step_id: d.step_id.clone(),
            deviation_seconds: d.delta_seconds,
            severity: d.severity,
            code: d.code,
            description: d.description.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultPayload {
    pub fault_id: String,
    pub step_id: String,
    pub severity: Severity,
    pub category: String,
    pub description: String,
    pub evidence_refs: Vec<String>,
}

impl From<&Fault> for FaultPayload {
    fn from(f: &Fault) -> Self {
        FaultPayload {
            fault_id: f.fault_id.clone(),
            step_id: f.deviation_ref.clone(),
            severity: f.severity,
            category: f.category.clone(),
            description: f.description.clone(),
            evidence_refs: f.evidence_refs.clone(),
        }
    }
}

/// Response to a merge request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeResponse {
    pub status: MergeStatus,
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_document: Option<ResolvedDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_status: Option<OverallStatus>,
    pub conflicts_resolved: usize,
    /// Steps in concurrent-conflict state awaiting manual review.
    #[serde(default)]
    pub review_required: Vec<String>,
    #[serde(default)]
    pub deviations: Vec<DeviationPayload>,
    #[serde(default)]
    pub faults: Vec<FaultPayload>,
    /// The untouched request, returned only with `sync_failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_request: Option<MergeRequest>,
}

impl MergeResponse {
    /// Response for a completed merge and its analysis.
    pub fn merged(outcome: &MergeOutcome, report: &AnalysisReport) -> Self {
        MergeResponse {
            status: MergeStatus::Merged,
            document_id: outcome.document.document_id.clone(),
            merged_document: Some(ResolvedDocument {
                document_id: outcome.document.document_id.clone(),
                scenario_id: outcome.document.scenario_id.clone(),
                vector_clock: outcome.document.vector_clock.clone(),
                steps: outcome.resolved.clone(),
            }),
            overall_status: Some(report.overall_status),
            conflicts_resolved: outcome.conflicts_resolved,
            review_required: outcome.review_required.clone(),
            deviations: report.deviations.iter().map(DeviationPayload::from).collect(),
            faults: report.faults.iter().map(FaultPayload::from).collect(),
            original_request: None,
        }
    }

    /// Response when the caller stopped waiting; the merge still completes.
    pub fn queued(document_id: &str) -> Self {
        MergeResponse {
            status: MergeStatus::Queued,
            document_id: document_id.to_string(),
            merged_document: None,
            overall_status: None,
            conflicts_resolved: 0,
            review_required: Vec::new(),
            deviations: Vec::new(),
            faults: Vec::new(),
            original_request: None,
        }
    }

    /// Response after retries were exhausted, carrying the request back.
    pub fn sync_failed(request: MergeRequest) -> Self {
        MergeResponse {
            status: MergeStatus::SyncFailed,
            document_id: request.document_id.clone(),
            merged_document: None,
            overall_status: None,
            conflicts_resolved: 0,
            review_required: Vec::new(),
            deviations: Vec::new(),
            faults: Vec::new(),
            original_request: Some(request),
        }
    }
}
