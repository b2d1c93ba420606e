//! ce-core: replicated session state and the merge engine for C&E test
//! executions.
//!
//! # Public API
//!
//! - [`VectorClock`] -- per-actor logical clock and causal comparison
//! - [`StepRecord`] / [`StepStatus`] -- one technician write for one step
//! - [`CrdtDocument`] / [`StepRegister`] -- replicated state of a session
//! - [`MergeEngine`] -- commutative, associative, idempotent document merge
//! - [`ScenarioDefinition`] -- the expected step sequence (read-only input)

pub mod clock;
pub mod document;
pub mod error;
pub mod merge;
pub mod record;
pub mod scenario;

pub use clock::{CausalOrder, VectorClock, MAX_COUNTER, SERVER_ACTOR};
pub use document::{CrdtDocument, OverallStatus, RegisterJoin, StepRegister};
pub use error::{ClockError, MergeError, ScenarioError};
pub use merge::{DeviationCheck, MergeEngine, MergeOutcome};
pub use record::{StepRecord, StepStatus, CONFLICT_NOTE};
pub use scenario::{ScenarioDefinition, ScenarioStep};
