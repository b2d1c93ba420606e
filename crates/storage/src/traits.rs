use async_trait::async_trait;
use ce_analyze::Fault;
use ce_core::CrdtDocument;

use crate::error::StorageError;
use crate::record::StoredDocument;

/// The storage trait for C&E session backends.
///
/// A `SessionStore` holds the merged document of every session and the
/// compliance faults raised against it.
///
/// ## Snapshot Semantics
///
/// All mutating operations take `&mut Self::Snapshot`, a type representing an
/// in-progress transaction. The lifecycle is:
///
/// 1. `begin_snapshot()` -- start a transaction, returns a `Snapshot`
/// 2. Call mutating methods with `&mut snapshot`
/// 3. `commit_snapshot(snapshot)` -- commit and consume the transaction
///    OR `abort_snapshot(snapshot)` -- roll back and consume the transaction
///
/// A merged document and the faults derived from it are written in the same
/// snapshot, so a failed commit leaves neither behind. If a `Snapshot` is
/// dropped without committing, nothing it wrote may become visible.
///
/// ## OCC Conflict Detection
///
/// `write_document` is conditional on the stored version equalling
/// `expected_version` (0 for a document never written). A mismatch, detected
/// either at write time or at commit, is `StorageError::ConcurrentConflict`.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be shared by the sync
/// coordinator's merge tasks and axum application state.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// The snapshot (transaction) type used by this storage backend.
    type Snapshot: Send;

    // ── Snapshot lifecycle ────────────────────────────────────────────────────

    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError>;

    /// Commit a snapshot, making its document write and faults durable
    /// together.
    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    /// Abort (roll back) a snapshot, discarding all writes.
    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    // ── Document operations (within snapshot) ─────────────────────────────────

    /// Read the committed document for a merge, or `None` for a new session.
    async fn get_document_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        document_id: &str,
    ) -> Result<Option<StoredDocument>, StorageError>;

    /// Write a merged document, conditional on `expected_version`.
    ///
    /// Returns the version the document will have once committed.
    async fn write_document(
        &self,
        snapshot: &mut Self::Snapshot,
        document: &CrdtDocument,
        expected_version: i64,
    ) -> Result<i64, StorageError>;

    /// Record faults, skipping any whose `fault_id` is already stored.
    ///
    /// Returns how many faults are new.
    async fn record_faults(
        &self,
        snapshot: &mut Self::Snapshot,
        faults: &[Fault],
    ) -> Result<usize, StorageError>;

    // ── Query operations (outside snapshot) ───────────────────────────────────

    /// Read a committed document.
    ///
    /// Returns `Err(StorageError::DocumentNotFound)` if it does not exist.
    async fn get_document(&self, document_id: &str) -> Result<StoredDocument, StorageError>;

    /// Faults recorded against a session, in insertion order.
    async fn list_faults(&self, document_id: &str) -> Result<Vec<Fault>, StorageError>;
}
