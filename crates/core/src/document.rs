//! Replicated state of one C&E test session.
//!
//! Each step is held in a [`StepRegister`]: the antichain of writes that no
//! other known write has causally superseded. Merging two registers is set
//! union followed by dropping dominated heads, which is commutative,
//! associative and idempotent. The single resolved [`StepRecord`] a caller
//! sees is a pure function of the heads, so every replica that holds the
//! same heads resolves the same record.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::clock::{CausalOrder, VectorClock};
use crate::record::{StepRecord, StepStatus, CONFLICT_NOTE};
use crate::scenario::ScenarioDefinition;

/// Derived session status. Recomputed from step records on every merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    #[default]
    InProgress,
    Completed,
    CompletedWithDeviations,
}

impl OverallStatus {
    /// `completed` iff every mandatory scenario step resolved to `completed`;
    /// `completed_with_deviations` iff additionally a deviation was found.
    pub fn derive(
        scenario: &ScenarioDefinition,
        resolved: &BTreeMap<String, StepRecord>,
        deviations_found: bool,
    ) -> Self {
        let all_completed = scenario.mandatory_steps().all(|step| {
            resolved
                .get(&step.step_id)
                .is_some_and(|r| r.status == StepStatus::Completed)
        });
        match (all_completed, deviations_found) {
            (false, _) => OverallStatus::InProgress,
            (true, false) => OverallStatus::Completed,
            (true, true) => OverallStatus::CompletedWithDeviations,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OverallStatus::InProgress => "in_progress",
            OverallStatus::Completed => "completed",
            OverallStatus::CompletedWithDeviations => "completed_with_deviations",
        }
    }
}

/// Concurrent heads for one step, kept sorted and deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StepRegister {
    heads: Vec<StepRecord>,
}

impl<'de> Deserialize<'de> for StepRegister {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let heads: Vec<StepRecord> = Vec::deserialize(deserializer)?;
        Ok(StepRegister::from_heads(heads))
    }
}

/// Result of joining two registers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterJoin {
    pub register: StepRegister,
    /// Concurrent (or same-clock, different-content) pairs met between heads
    /// that only one side knew about.
    pub concurrent_pairs: usize,
}

impl StepRegister {
    pub fn single(record: StepRecord) -> Self {
        StepRegister {
            heads: vec![record.into_head()],
        }
    }

    /// Build a register from arbitrary writes, keeping only the maximal ones.
    pub fn from_heads(records: impl IntoIterator<Item = StepRecord>) -> Self {
        let candidates: Vec<StepRecord> = records.into_iter().map(StepRecord::into_head).collect();
        StepRegister {
            heads: maximal(candidates),
        }
    }

    pub fn heads(&self) -> &[StepRecord] {
        &self.heads
    }

    pub fn step_id(&self) -> Option<&str> {
        self.heads.first().map(|h| h.step_id.as_str())
    }

    /// Join of the two registers' heads.
    pub fn join(&self, other: &StepRegister) -> RegisterJoin {
        let mut concurrent_pairs = 0;
        for mine in self.heads.iter().filter(|h| !other.heads.contains(h)) {
            for theirs in other.heads.iter().filter(|h| !self.heads.contains(h)) {
                match mine.clock.compare(&theirs.clock) {
                    CausalOrder::Concurrent | CausalOrder::Equal => concurrent_pairs += 1,
                    CausalOrder::Before | CausalOrder::After => {}
                }
            }
        }

        let candidates = self.heads.iter().chain(other.heads.iter()).cloned().collect();
        RegisterJoin {
            register: StepRegister {
                heads: maximal(candidates),
            },
            concurrent_pairs,
        }
    }

    /// Pointwise merge of every head's clock.
    pub fn clock(&self) -> VectorClock {
        self.heads
            .iter()
            .fold(VectorClock::new(), |acc, h| acc.merge(&h.clock))
    }

    /// Heads whose writes are causally covered by `clock`.
    pub fn observed_by(&self, clock: &VectorClock) -> Vec<StepRecord> {
        self.heads
            .iter()
            .filter(|h| clock.dominates(&h.clock))
            .cloned()
            .collect()
    }

    /// True when the concurrent heads disagree on a terminal outcome.
    pub fn has_conflicting_outcomes(&self) -> bool {
        let top_rank = self.heads.iter().map(|h| h.status.rank()).max();
        match top_rank {
            Some(rank) if rank == StepStatus::Completed.rank() => {
                let outcomes: BTreeSet<StepStatus> = self
                    .heads
                    .iter()
                    .filter(|h| h.status.rank() == rank)
                    .map(|h| h.status)
                    .collect();
                outcomes.len() > 1
            }
            _ => false,
        }
    }

    /// Deterministically resolve the heads into one record.
    ///
    /// Most advanced status wins. Disagreeing terminal outcomes resolve to
    /// `failed` with [`CONFLICT_NOTE`]. Agreeing `completed` heads prefer the
    /// shortest duration; everything else falls back to actor id, then wall
    /// clock. Evidence is the union over all heads and the clock is the join
    /// of all head clocks.
    pub fn resolve(&self) -> Option<StepRecord> {
        let top_rank = self.heads.iter().map(|h| h.status.rank()).max()?;
        let top: Vec<&StepRecord> = self
            .heads
            .iter()
            .filter(|h| h.status.rank() == top_rank)
            .collect();

        let conflicting = self.has_conflicting_outcomes();
        let all_completed = top.iter().all(|h| h.status == StepStatus::Completed);

        let winner = if all_completed && !conflicting {
            top.iter().copied().min_by(|a, b| {
                duration_key(a)
                    .cmp(&duration_key(b))
                    .then_with(|| b.tie_break_cmp(a))
            })
        } else {
            top.iter().copied().max_by(|a, b| a.tie_break_cmp(b))
        }?;

        let mut resolved = winner.clone();
        resolved.clock = self.clock();
        resolved.evidence_refs = self
            .heads
            .iter()
            .flat_map(|h| h.evidence_refs.iter().cloned())
            .collect();
        if conflicting {
            resolved.status = StepStatus::Failed;
            resolved.notes = CONFLICT_NOTE.to_string();
            resolved.conflicting_outcomes = true;
        }
        Some(resolved)
    }
}

/// Completed heads with a measured duration sort before those without one.
fn duration_key(record: &StepRecord) -> (bool, Option<rust_decimal::Decimal>) {
    (record.actual_duration.is_none(), record.actual_duration)
}

/// Keep only heads not strictly causally before another head; sort and dedupe.
fn maximal(mut candidates: Vec<StepRecord>) -> Vec<StepRecord> {
    candidates.sort();
    candidates.dedup();
    let keep: Vec<bool> = candidates
        .iter()
        .map(|c| {
            !candidates
                .iter()
                .any(|other| c.clock.compare(&other.clock) == CausalOrder::Before)
        })
        .collect();
    candidates
        .into_iter()
        .zip(keep)
        .filter_map(|(c, keep)| keep.then_some(c))
        .collect()
}

/// Replicated state of one test session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrdtDocument {
    pub document_id: String,
    #[serde(default)]
    pub scenario_id: String,
    pub vector_clock: VectorClock,
    #[serde(default)]
    pub steps: BTreeMap<String, StepRegister>,
    /// Derived; recomputed whenever the document passes through a merge.
    #[serde(default)]
    pub overall_status: OverallStatus,
}

impl CrdtDocument {
    pub fn new(document_id: impl Into<String>, scenario_id: impl Into<String>) -> Self {
        CrdtDocument {
            document_id: document_id.into(),
            scenario_id: scenario_id.into(),
            vector_clock: VectorClock::new(),
            steps: BTreeMap::new(),
            overall_status: OverallStatus::InProgress,
        }
    }

    /// Record a write into its step's register. The document clock absorbs
    /// the write's clock.
    pub fn apply(&mut self, record: StepRecord) {
        self.vector_clock.merge_in_place(&record.clock);
        let incoming = StepRegister::single(record);
        let step_id = incoming.step_id().unwrap_or_default().to_string();
        let joined = match self.steps.get(&step_id) {
            Some(existing) => existing.join(&incoming).register,
            None => incoming,
        };
        self.steps.insert(step_id, joined);
    }

    /// Resolved record per step. Steps the scenario does not know are kept
    /// and flagged rather than dropped.
    pub fn resolved_steps(
        &self,
        scenario: Option<&ScenarioDefinition>,
    ) -> BTreeMap<String, StepRecord> {
        self.steps
            .iter()
            .filter_map(|(step_id, register)| {
                let mut record = register.resolve()?;
                if let Some(scenario) = scenario {
                    record.unrecognized_step = !scenario.contains(step_id);
                }
                Some((step_id.clone(), record))
            })
            .collect()
    }

    /// Step ids whose concurrent writers disagree and need human review.
    pub fn review_required(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter(|(_, register)| register.has_conflicting_outcomes())
            .map(|(step_id, _)| step_id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn clock(pairs: &[(&str, i64)]) -> VectorClock {
        VectorClock::from_signed(pairs.iter().copied()).unwrap()
    }

    fn write(actor: &str, pairs: &[(&str, i64)], status: StepStatus) -> StepRecord {
        StepRecord::new("s1", actor, clock(pairs), "2025-03-01T10:00:00Z").with_status(status)
    }

    #[test]
    fn causally_later_write_supersedes() {
        let first = write("A", &[("A", 1)], StepStatus::InProgress);
        let second = write("B", &[("A", 1), ("B", 1)], StepStatus::Completed);
        let joined = StepRegister::single(first).join(&StepRegister::single(second.clone()));
        assert_eq!(joined.register.heads(), &[second]);
        assert_eq!(joined.concurrent_pairs, 0);
    }

    #[test]
    fn concurrent_conflicting_outcomes_resolve_to_failed() {
        let a = write("A", &[("A", 1)], StepStatus::Completed);
        let b = write("B", &[("B", 1)], StepStatus::Failed);
        let joined = StepRegister::single(a).join(&StepRegister::single(b));
        assert_eq!(joined.concurrent_pairs, 1);

        let resolved = joined.register.resolve().unwrap();
        assert_eq!(resolved.status, StepStatus::Failed);
        assert_eq!(resolved.notes, CONFLICT_NOTE);
        assert!(resolved.conflicting_outcomes);
        assert_eq!(resolved.clock, clock(&[("A", 1), ("B", 1)]));
    }

    #[test]
    fn concurrent_completed_prefers_smaller_duration() {
        let slow = write("A", &[("A", 1)], StepStatus::Completed).with_duration(Decimal::new(40, 1));
        let fast = write("B", &[("B", 1)], StepStatus::Completed).with_duration(Decimal::new(35, 1));
        let register = StepRegister::from_heads([slow, fast]);
        let resolved = register.resolve().unwrap();
        assert_eq!(resolved.actual_duration, Some(Decimal::new(35, 1)));
        assert_eq!(resolved.actor, "B");
        assert!(!resolved.conflicting_outcomes);
    }

    #[test]
    fn more_advanced_status_wins_over_concurrent_progress() {
        let started = write("A", &[("A", 1)], StepStatus::InProgress);
        let skipped = write("B", &[("B", 1)], StepStatus::Skipped);
        let resolved = StepRegister::from_heads([started, skipped]).resolve().unwrap();
        assert_eq!(resolved.status, StepStatus::Skipped);
    }

    #[test]
    fn evidence_is_unioned_across_concurrent_heads() {
        let a = write("A", &[("A", 1)], StepStatus::Completed).with_evidence("photo-1");
        let b = write("B", &[("B", 1)], StepStatus::InProgress).with_evidence("photo-2");
        let resolved = StepRegister::from_heads([a, b]).resolve().unwrap();
        let refs: Vec<&str> = resolved.evidence_refs.iter().map(String::as_str).collect();
        assert_eq!(refs, vec!["photo-1", "photo-2"]);
    }

    #[test]
    fn duplicate_heads_collapse() {
        let a = write("A", &[("A", 1)], StepStatus::Completed);
        let joined = StepRegister::single(a.clone()).join(&StepRegister::single(a.clone()));
        assert_eq!(joined.register.heads(), &[a]);
        assert_eq!(joined.concurrent_pairs, 0);
    }

    #[test]
    fn observed_by_filters_unseen_heads() {
        let a = write("A", &[("A", 1)], StepStatus::Completed);
        let b = write("B", &[("B", 2)], StepStatus::Completed);
        let register = StepRegister::from_heads([a.clone(), b]);
        assert_eq!(register.observed_by(&clock(&[("A", 3), ("B", 1)])), vec![a]);
    }

    #[test]
    fn overall_status_requires_every_mandatory_step() {
        let scenario: ScenarioDefinition = serde_json::from_value(serde_json::json!({
            "scenario_id": "sc",
            "steps": [
                {"step_id": "s1", "name": "one", "expected_seconds": "1"},
                {"step_id": "s2", "name": "two", "expected_seconds": "1", "mandatory": false}
            ]
        }))
        .unwrap();

        let mut doc = CrdtDocument::new("doc-1", "sc");
        assert_eq!(
            OverallStatus::derive(&scenario, &doc.resolved_steps(Some(&scenario)), false),
            OverallStatus::InProgress
        );

        doc.apply(write("A", &[("A", 1)], StepStatus::Completed));
        let resolved = doc.resolved_steps(Some(&scenario));
        assert_eq!(
            OverallStatus::derive(&scenario, &resolved, false),
            OverallStatus::Completed
        );
        assert_eq!(
            OverallStatus::derive(&scenario, &resolved, true),
            OverallStatus::CompletedWithDeviations
        );
    }

    #[test]
    fn unknown_steps_are_flagged_not_dropped() {
        let scenario: ScenarioDefinition = serde_json::from_value(serde_json::json!({
            "scenario_id": "sc",
            "steps": [{"step_id": "s1", "name": "one", "expected_seconds": "1"}]
        }))
        .unwrap();
        let mut doc = CrdtDocument::new("doc-1", "sc");
        doc.apply(StepRecord::new("ghost", "A", clock(&[("A", 1)]), "2025-03-01T10:00:00Z"));

        let resolved = doc.resolved_steps(Some(&scenario));
        assert!(resolved["ghost"].unrecognized_step);
        assert_eq!(doc.vector_clock, clock(&[("A", 1)]));
    }
}
