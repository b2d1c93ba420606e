/// A malformed vector clock. Rejected at ingress, before any merge runs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    #[error("invalid clock: actor '{actor}' has negative counter {counter}")]
    NegativeCounter { actor: String, counter: i64 },

    #[error("invalid clock: empty actor id")]
    EmptyActor,

    /// The writing actor did not advance its own entry for a batch of changes.
    #[error("invalid clock: writer '{actor}' has no entry of its own")]
    MissingWriterEntry { actor: String },
}

/// A scenario definition that cannot be used for comparison.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScenarioError {
    #[error("malformed scenario: {0}")]
    Malformed(String),

    #[error("scenario {scenario_id}: duplicate step '{step_id}'")]
    DuplicateStep {
        scenario_id: String,
        step_id: String,
    },

    #[error("scenario {scenario_id}: step '{step_id}' has a negative expected time")]
    NegativeExpectedTime {
        scenario_id: String,
        step_id: String,
    },
}

/// Two documents that cannot be merged because they describe different sessions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    #[error("document mismatch: local '{local}' vs incoming '{incoming}'")]
    DocumentMismatch { local: String, incoming: String },

    #[error("document {document_id}: scenario mismatch '{local}' vs '{incoming}'")]
    ScenarioMismatch {
        document_id: String,
        local: String,
        incoming: String,
    },
}
