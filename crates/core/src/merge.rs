//! MergeEngine: combines a local (server) document with an incoming one.
//!
//! Per step present in either document:
//!
//! 1. One side only: taken as-is.
//! 2. Both sides: the registers are joined. Causally later writes supersede
//!    earlier ones; concurrent writes stay as heads and are resolved
//!    deterministically (see [`StepRegister::resolve`]).
//! 3. The document clock is the pointwise merge of both clocks.
//! 4. `overall_status` is recomputed from the merged steps, never copied.
//!    Whether the steps deviate from the scenario is decided by the
//!    [`DeviationCheck`] the engine was built with.
//!
//! Steps absent from the scenario are kept and flagged; the engine never
//! drops a technician's write because of a schema mismatch.

use std::collections::BTreeMap;

use tracing::debug;

use crate::document::{CrdtDocument, OverallStatus, StepRegister};
use crate::error::MergeError;
use crate::record::StepRecord;
use crate::scenario::ScenarioDefinition;

/// Output of a single merge pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub document: CrdtDocument,
    /// Resolved view of every step, with `unrecognized_step` flags applied.
    pub resolved: BTreeMap<String, StepRecord>,
    /// Concurrent comparisons encountered between writes new to one side.
    pub conflicts_resolved: usize,
    /// Steps left in concurrent-conflict state for manual review.
    pub review_required: Vec<String>,
}

/// Decides whether resolved steps deviate from the scenario badly enough to
/// mark a completed session `completed_with_deviations`.
pub trait DeviationCheck: Send + Sync {
    fn deviations_found(
        &self,
        scenario: &ScenarioDefinition,
        resolved: &BTreeMap<String, StepRecord>,
    ) -> bool;
}

/// Merges documents of sessions that execute one scenario.
#[derive(Clone, Copy)]
pub struct MergeEngine<'a> {
    scenario: &'a ScenarioDefinition,
    check: &'a dyn DeviationCheck,
}

impl<'a> MergeEngine<'a> {
    pub fn new(scenario: &'a ScenarioDefinition, check: &'a dyn DeviationCheck) -> Self {
        MergeEngine { scenario, check }
    }

    pub fn scenario(&self) -> &ScenarioDefinition {
        self.scenario
    }

    /// Merge `incoming` into `local`. Neither input is modified.
    pub fn merge(
        &self,
        local: &CrdtDocument,
        incoming: &CrdtDocument,
    ) -> Result<MergeOutcome, MergeError> {
        if local.document_id != incoming.document_id {
            return Err(MergeError::DocumentMismatch {
                local: local.document_id.clone(),
                incoming: incoming.document_id.clone(),
            });
        }
        let scenario_id = merge_scenario_id(local, incoming)?;

        let mut steps: BTreeMap<String, StepRegister> = BTreeMap::new();
        let mut conflicts_resolved = 0;

        for (step_id, register) in local.steps.iter().chain(incoming.steps.iter()) {
            match steps.get(step_id) {
                Some(existing) => {
                    let joined = existing.join(register);
                    conflicts_resolved += joined.concurrent_pairs;
                    steps.insert(step_id.clone(), joined.register);
                }
                None => {
                    steps.insert(step_id.clone(), register.clone());
                }
            }
        }

        let mut document = CrdtDocument {
            document_id: local.document_id.clone(),
            scenario_id,
            vector_clock: local.vector_clock.merge(&incoming.vector_clock),
            steps,
            overall_status: OverallStatus::InProgress,
        };
        let resolved = document.resolved_steps(Some(self.scenario));
        let deviations_found = self.check.deviations_found(self.scenario, &resolved);
        document.overall_status = OverallStatus::derive(self.scenario, &resolved, deviations_found);
        let review_required = document.review_required();

        debug!(
            document_id = %document.document_id,
            clock = %document.vector_clock,
            steps = document.steps.len(),
            conflicts_resolved,
            review = review_required.len(),
            "merged session document"
        );

        Ok(MergeOutcome {
            document,
            resolved,
            conflicts_resolved,
            review_required,
        })
    }

    /// Fold a sequence of documents (in any order) into one.
    pub fn merge_all<'d, I>(&self, seed: &CrdtDocument, documents: I) -> Result<MergeOutcome, MergeError>
    where
        I: IntoIterator<Item = &'d CrdtDocument>,
    {
        let mut outcome = self.merge(seed, seed)?;
        for doc in documents {
            let next = self.merge(&outcome.document, doc)?;
            outcome = MergeOutcome {
                conflicts_resolved: outcome.conflicts_resolved + next.conflicts_resolved,
                ..next
            };
        }
        Ok(outcome)
    }
}

/// A document that has not yet learned its scenario adopts the other side's.
fn merge_scenario_id(local: &CrdtDocument, incoming: &CrdtDocument) -> Result<String, MergeError> {
    match (local.scenario_id.as_str(), incoming.scenario_id.as_str()) {
        (l, i) if l == i => Ok(l.to_string()),
        ("", i) => Ok(i.to_string()),
        (l, "") => Ok(l.to_string()),
        (l, i) => Err(MergeError::ScenarioMismatch {
            document_id: local.document_id.clone(),
            local: l.to_string(),
            incoming: i.to_string(),
        }),
    }
}
