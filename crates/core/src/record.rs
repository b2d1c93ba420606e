use std::collections::BTreeSet;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::clock::VectorClock;

/// Review note attached when concurrent writers disagree on a step's outcome.
pub const CONFLICT_NOTE: &str = "concurrent conflicting outcomes";

/// Execution status of a single scenario step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    /// Advancement rank: pending < in_progress < any terminal outcome.
    pub fn rank(self) -> u8 {
        match self {
            StepStatus::Pending => 0,
            StepStatus::InProgress => 1,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in_progress",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// One technician write for one scenario step.
///
/// `actor`, `clock` and `recorded_at` stamp the originating write. The clock
/// decides causal order; `recorded_at` is device wall-clock time kept for
/// audit ordering and as the last tie-break, never for duration math.
/// `actual_duration` comes from the device's monotonic timer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: String,
    pub status: StepStatus,
    /// ISO 8601 / RFC 3339 timestamp string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    /// ISO 8601 / RFC 3339 timestamp string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    /// Seconds, measured on-device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_duration: Option<Decimal>,
    #[serde(default)]
    pub notes: String,
    /// Opaque ids owned by the external evidence store.
    #[serde(default)]
    pub evidence_refs: BTreeSet<String>,
    pub actor: String,
    pub clock: VectorClock,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub recorded_at: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub unrecognized_step: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub conflicting_outcomes: bool,
}

impl StepRecord {
    /// A fresh `pending` record stamped by `actor` at `clock`.
    pub fn new(
        step_id: impl Into<String>,
        actor: impl Into<String>,
        clock: VectorClock,
        recorded_at: impl Into<String>,
    ) -> Self {
        StepRecord {
            step_id: step_id.into(),
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
            actual_duration: None,
            notes: String::new(),
            evidence_refs: BTreeSet::new(),
            actor: actor.into(),
            clock,
            recorded_at: recorded_at.into(),
            unrecognized_step: false,
            conflicting_outcomes: false,
        }
    }

    pub fn with_status(mut self, status: StepStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_duration(mut self, seconds: Decimal) -> Self {
        self.actual_duration = Some(seconds);
        self
    }

    pub fn with_evidence(mut self, evidence_id: impl Into<String>) -> Self {
        self.evidence_refs.insert(evidence_id.into());
        self
    }

    /// Wall-clock `recorded_at` as nanoseconds since the epoch, if parseable.
    pub fn recorded_at_nanos(&self) -> Option<i128> {
        OffsetDateTime::parse(&self.recorded_at, &Rfc3339)
            .ok()
            .map(|t| t.unix_timestamp_nanos())
    }

    /// Deterministic tie-break order: actor id, then wall clock, then the
    /// full record so that no two distinct heads ever compare equal.
    pub(crate) fn tie_break_cmp(&self, other: &StepRecord) -> std::cmp::Ordering {
        self.actor
            .cmp(&other.actor)
            .then_with(|| self.recorded_at_nanos().cmp(&other.recorded_at_nanos()))
            .then_with(|| self.cmp(other))
    }

    /// Canonical form stored in a register: flags that only resolved views
    /// carry are stripped and durations are normalized so that `2.5` and
    /// `2.50` are the same write.
    pub(crate) fn into_head(mut self) -> Self {
        self.unrecognized_step = false;
        self.conflicting_outcomes = false;
        self.actual_duration = self.actual_duration.map(|d| d.normalize());
        self
    }
}
