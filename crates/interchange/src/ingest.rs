//! Folding a validated change batch into an incoming session document.
//!
//! For every step the batch touches, the device's write starts from the
//! resolved view of the heads its clock had observed, then applies the
//! changes in order. The result is stamped with the request clock and the
//! device actor, so it supersedes exactly what the device saw and stays
//! concurrent with everything it did not.
//!
//! A device ticks its own counter once per batch. A batch whose counter is
//! more than one ahead of what the session has seen from that device would
//! causally cover a batch the server never received, so it is refused until
//! the gap is filled.

use std::collections::BTreeMap;

use ce_core::{CrdtDocument, StepRecord, StepRegister, StepStatus};

use crate::deserialize::InterchangeError;
use crate::types::{ChangeKind, StepChange, ValidatedRequest};

impl ValidatedRequest {
    /// Refuse a batch that skips over counters `base` has not seen from
    /// this device. Resubmissions (counter at or below what is known) pass.
    pub fn check_sequence(&self, base: &CrdtDocument) -> Result<(), InterchangeError> {
        if self.changes.is_empty() {
            return Ok(());
        }
        let known = base.vector_clock.get(&self.actor_id);
        let received = self.clock.get(&self.actor_id);
        if received > known.saturating_add(1) {
            return Err(InterchangeError::OutOfOrder {
                actor_id: self.actor_id.clone(),
                known,
                received,
            });
        }
        Ok(())
    }

    /// Build the incoming document for this batch against `base`.
    ///
    /// Applying the same batch to a base that already contains its own
    /// result reproduces that result exactly: every change is a field
    /// assignment or a set insert.
    pub fn to_document(&self, base: &CrdtDocument) -> CrdtDocument {
        let mut document = CrdtDocument::new(self.document_id.clone(), self.scenario_id.clone());
        document.vector_clock = self.clock.clone();

        let mut by_step: BTreeMap<&str, Vec<&StepChange>> = BTreeMap::new();
        for change in &self.changes {
            by_step.entry(change.step_id.as_str()).or_default().push(change);
        }

        for (step_id, changes) in by_step {
            let recorded_at = changes
                .iter()
                .max_by_key(|c| c.timestamp_nanos)
                .map(|c| c.timestamp.clone())
                .unwrap_or_default();

            let observed = base
                .steps
                .get(step_id)
                .map(|register| register.observed_by(&self.clock))
                .unwrap_or_default();
            let mut record = StepRegister::from_heads(observed)
                .resolve()
                .unwrap_or_else(|| {
                    StepRecord::new(step_id, &self.actor_id, self.clock.clone(), "")
                });

            for change in changes {
                apply_change(&mut record, &change.kind);
            }
            record.actor = self.actor_id.clone();
            record.clock = self.clock.clone();
            record.recorded_at = recorded_at;
            record.conflicting_outcomes = false;
            record.unrecognized_step = false;

            document.apply(record);
        }
        document
    }
}

fn apply_change(record: &mut StepRecord, kind: &ChangeKind) {
    match kind {
        ChangeKind::Started { started_at } => {
            record.status = StepStatus::InProgress;
            record.started_at = Some(started_at.clone());
            record.completed_at = None;
            record.actual_duration = None;
        }
        ChangeKind::Completed {
            completed_at,
            actual_duration,
        } => {
            record.status = StepStatus::Completed;
            record.completed_at = Some(completed_at.clone());
            record.actual_duration = Some(*actual_duration);
        }
        ChangeKind::Failed {
            completed_at,
            actual_duration,
        } => {
            record.status = StepStatus::Failed;
            record.completed_at = completed_at.clone();
            record.actual_duration = *actual_duration;
        }
        ChangeKind::Skipped => {
            record.status = StepStatus::Skipped;
        }
        ChangeKind::NotesSet { notes } => {
            record.notes = notes.clone();
        }
        ChangeKind::EvidenceLinked { evidence_id } => {
            record.evidence_refs.insert(evidence_id.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::deserialize::parse_request;
    use ce_analyze::merge_engine;
    use ce_core::{ScenarioDefinition, StepStatus, VectorClock};
    use rust_decimal::Decimal;
    use serde_json::json;

    fn scenario() -> ScenarioDefinition {
        ScenarioDefinition::from_json(&json!({
            "scenario_id": "panel",
            "steps": [
                {"step_id": "s1", "name": "Activate fire panel", "expected_seconds": "2.0"},
                {"step_id": "s2", "name": "Release door holders", "expected_seconds": "3.0"}
            ]
        }))
        .unwrap()
    }

    fn batch(actor: &str, clock: serde_json::Value, changes: serde_json::Value) -> super::ValidatedRequest {
        parse_request(&json!({
            "document_id": "session-1",
            "scenario_id": "panel",
            "vector_clock": clock,
            "changes": changes,
            "device_info": {"actor_id": actor}
        }))
        .unwrap()
        .validate()
        .unwrap()
    }

    #[test]
    fn changes_fold_in_order_into_one_write() {
        let req = batch(
            "tablet-a",
            json!({"tablet-a": 1}),
            json!([
                {"step_id": "s1", "type": "step_started", "timestamp": "2025-03-01T10:00:00Z"},
                {"step_id": "s1", "type": "step_completed", "timestamp": "2025-03-01T10:00:03Z",
                 "data": {"actual_duration": "2.5"}},
                {"step_id": "s1", "type": "evidence_linked", "timestamp": "2025-03-01T10:00:04Z",
                 "data": {"evidence_id": "photo-1"}}
            ]),
        );
        let doc = req.to_document(&ce_core::CrdtDocument::new("session-1", "panel"));

        let heads = doc.steps["s1"].heads();
        assert_eq!(heads.len(), 1);
        let record = &heads[0];
        assert_eq!(record.status, StepStatus::Completed);
        assert_eq!(record.started_at.as_deref(), Some("2025-03-01T10:00:00Z"));
        assert_eq!(record.actual_duration, Some(Decimal::new(25, 1)));
        assert_eq!(record.recorded_at, "2025-03-01T10:00:04Z");
        assert_eq!(record.actor, "tablet-a");
        assert!(record.evidence_refs.contains("photo-1"));
        assert_eq!(doc.vector_clock, VectorClock::from_signed([("tablet-a", 1)]).unwrap());
    }

    #[test]
    fn resubmitting_a_batch_is_a_no_op() {
        let s = scenario();
        let engine = merge_engine(&s);
        let req = batch(
            "tablet-a",
            json!({"tablet-a": 1}),
            json!([{"step_id": "s1", "type": "step_completed", "timestamp": "2025-03-01T10:00:03Z",
                    "data": {"actual_duration": "2.5"}}]),
        );

        let empty = ce_core::CrdtDocument::new("session-1", "panel");
        let first = engine.merge(&empty, &req.to_document(&empty)).unwrap();
        let second = engine
            .merge(&first.document, &req.to_document(&first.document))
            .unwrap();

        assert_eq!(second.document, first.document);
        assert_eq!(second.conflicts_resolved, 0);
    }

    #[test]
    fn later_batch_builds_on_what_the_device_saw() {
        let s = scenario();
        let engine = merge_engine(&s);
        let empty = ce_core::CrdtDocument::new("session-1", "panel");

        let first = batch(
            "tablet-a",
            json!({"tablet-a": 1}),
            json!([{"step_id": "s1", "type": "evidence_linked", "timestamp": "2025-03-01T10:00:00Z",
                    "data": {"evidence_id": "photo-1"}}]),
        );
        let merged = engine.merge(&empty, &first.to_document(&empty)).unwrap();

        let second = batch(
            "tablet-a",
            json!({"tablet-a": 2}),
            json!([{"step_id": "s1", "type": "step_completed", "timestamp": "2025-03-01T10:00:05Z",
                    "data": {"actual_duration": "1.5"}}]),
        );
        let merged = engine
            .merge(&merged.document, &second.to_document(&merged.document))
            .unwrap();

        let heads = merged.document.steps["s1"].heads();
        assert_eq!(heads.len(), 1);
        assert_eq!(heads[0].status, StepStatus::Completed);
        assert!(heads[0].evidence_refs.contains("photo-1"));
        assert_eq!(merged.conflicts_resolved, 0);
    }

    #[test]
    fn unseen_concurrent_write_stays_a_separate_head() {
        let s = scenario();
        let engine = merge_engine(&s);
        let empty = ce_core::CrdtDocument::new("session-1", "panel");

        let from_b = batch(
            "tablet-b",
            json!({"tablet-b": 1}),
            json!([{"step_id": "s1", "type": "step_failed", "timestamp": "2025-03-01T10:00:01Z"}]),
        );
        let merged = engine.merge(&empty, &from_b.to_document(&empty)).unwrap();

        let from_a = batch(
            "tablet-a",
            json!({"tablet-a": 1}),
            json!([{"step_id": "s1", "type": "step_completed", "timestamp": "2025-03-01T10:00:02Z",
                    "data": {"actual_duration": "2.0"}}]),
        );
        let merged = engine
            .merge(&merged.document, &from_a.to_document(&merged.document))
            .unwrap();

        assert_eq!(merged.conflicts_resolved, 1);
        assert_eq!(merged.review_required, vec!["s1".to_string()]);
        assert_eq!(merged.resolved["s1"].status, StepStatus::Failed);
    }

    #[test]
    fn batch_that_skips_a_counter_is_refused() {
        let s = scenario();
        let engine = merge_engine(&s);
        let empty = ce_core::CrdtDocument::new("session-1", "panel");

        let second = batch(
            "tablet-a",
            json!({"tablet-a": 2}),
            json!([{"step_id": "s1", "type": "step_completed", "timestamp": "2025-03-01T10:00:05Z",
                    "data": {"actual_duration": "1.5"}}]),
        );
        let err = second.check_sequence(&empty).unwrap_err();
        assert_eq!(
            err,
            crate::InterchangeError::OutOfOrder {
                actor_id: "tablet-a".to_string(),
                known: 0,
                received: 2,
            }
        );

        let first = batch(
            "tablet-a",
            json!({"tablet-a": 1}),
            json!([{"step_id": "s1", "type": "evidence_linked", "timestamp": "2025-03-01T10:00:00Z",
                    "data": {"evidence_id": "photo-1"}}]),
        );
        first.check_sequence(&empty).unwrap();
        let merged = engine.merge(&empty, &first.to_document(&empty)).unwrap();

        second.check_sequence(&merged.document).unwrap();
        first.check_sequence(&merged.document).unwrap();
    }

    #[test]
    fn empty_batch_is_never_out_of_order() {
        let heartbeat = batch("tablet-a", json!({"tablet-a": 9}), json!([]));
        heartbeat
            .check_sequence(&ce_core::CrdtDocument::new("session-1", "panel"))
            .unwrap();
    }
}
