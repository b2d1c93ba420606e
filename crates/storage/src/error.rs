/// All errors that can be returned by a SessionStore implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// Optimistic concurrency control conflict: another writer committed the
    /// document since it was read. The expected version was not found.
    #[error("concurrent conflict on document {document_id}: expected version {expected_version}")]
    ConcurrentConflict {
        document_id: String,
        expected_version: i64,
    },

    /// No document with the given id has been committed.
    #[error("document not found: {document_id}")]
    DocumentNotFound { document_id: String },

    /// The backend is temporarily unreachable (connection reset, failover).
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A backend-specific storage error (serialization, corrupt data, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Whether re-running the whole read-merge-write cycle may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::Unavailable(_) | StorageError::ConcurrentConflict { .. }
        )
    }
}
