use ce_core::MergeError;
use ce_interchange::{InterchangeError, MergeRequest};
use ce_storage::StorageError;

/// Errors returned by the sync coordinator.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The request was rejected at ingress; nothing was queued.
    #[error(transparent)]
    Invalid(#[from] InterchangeError),

    #[error("unknown scenario '{scenario_id}'")]
    UnknownScenario { scenario_id: String },

    /// The stored document and the request disagree on identity.
    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("session not found: {document_id}")]
    SessionNotFound { document_id: String },

    /// Persistent failure. Nothing was written; `request` is the payload as
    /// received so the device can keep it and resend.
    #[error("sync failed for {document_id} after {attempts} attempt(s): {last_error}")]
    SyncFailed {
        document_id: String,
        attempts: u32,
        last_error: String,
        request: Box<MergeRequest>,
    },

    /// The batch skips counters the session has not seen from its device.
    /// Nothing was written; the device resends its earlier batches first,
    /// then `request`.
    #[error("{reason}")]
    OutOfOrder {
        document_id: String,
        reason: InterchangeError,
        request: Box<MergeRequest>,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}
