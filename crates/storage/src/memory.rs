//! In-memory `SessionStore`.
//!
//! Used by `cesync serve` when no external backend is configured and by the
//! test suites. Writes are buffered in the snapshot and applied under one
//! lock at commit, so commit is all-or-nothing and uncommitted writes are
//! never visible to readers.
//!
//! Transient failures can be injected with [`InMemoryStore::fail_next_commits`]
//! and slow commits with [`InMemoryStore::set_commit_delay`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ce_analyze::Fault;
use ce_core::CrdtDocument;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StorageError;
use crate::record::StoredDocument;
use crate::traits::SessionStore;

#[derive(Debug, Default)]
struct Inner {
    documents: BTreeMap<String, StoredDocument>,
    faults: BTreeMap<String, Vec<Fault>>,
    fault_ids: BTreeSet<String>,
}

/// Pending writes of one transaction.
#[derive(Debug, Default)]
pub struct InMemorySnapshot {
    documents: BTreeMap<String, (CrdtDocument, i64)>,
    faults: Vec<Fault>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
    failing_commits: Arc<AtomicUsize>,
    commit_delay_ms: Arc<AtomicU64>,
    commits: Arc<AtomicUsize>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` commits fail with `StorageError::Unavailable`.
    pub fn fail_next_commits(&self, n: usize) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }

    /// Delay every commit by `delay` before it is applied.
    pub fn set_commit_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.commit_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Number of successful commits so far.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

fn stored_version(inner: &Inner, document_id: &str) -> i64 {
    inner
        .documents
        .get(document_id)
        .map(|d| d.version)
        .unwrap_or(0)
}

#[async_trait]
impl SessionStore for InMemoryStore {
    type Snapshot = InMemorySnapshot;

    async fn begin_snapshot(&self) -> Result<InMemorySnapshot, StorageError> {
        Ok(InMemorySnapshot::default())
    }

    async fn commit_snapshot(&self, snapshot: InMemorySnapshot) -> Result<(), StorageError> {
        let delay = self.commit_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.take_injected_failure() {
            return Err(StorageError::Unavailable(
                "injected commit failure".to_string(),
            ));
        }

        let mut inner = self.inner.lock().await;
        for (document_id, (_, expected_version)) in &snapshot.documents {
            if stored_version(&inner, document_id) != *expected_version {
                return Err(StorageError::ConcurrentConflict {
                    document_id: document_id.clone(),
                    expected_version: *expected_version,
                });
            }
        }

        let updated_at = now_rfc3339();
        for (document_id, (document, expected_version)) in snapshot.documents {
            inner.documents.insert(
                document_id,
                StoredDocument {
                    document,
                    version: expected_version + 1,
                    updated_at: updated_at.clone(),
                },
            );
        }
        for fault in snapshot.faults {
            if inner.fault_ids.insert(fault.fault_id.clone()) {
                inner
                    .faults
                    .entry(fault.session_id.clone())
                    .or_default()
                    .push(fault);
            }
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        debug!("in-memory snapshot committed");
        Ok(())
    }

    async fn abort_snapshot(&self, _snapshot: InMemorySnapshot) -> Result<(), StorageError> {
        Ok(())
    }

    async fn get_document_for_update(
        &self,
        _snapshot: &mut InMemorySnapshot,
        document_id: &str,
    ) -> Result<Option<StoredDocument>, StorageError> {
        let inner = self.inner.lock().await;
        Ok(inner.documents.get(document_id).cloned())
    }

    async fn write_document(
        &self,
        snapshot: &mut InMemorySnapshot,
        document: &CrdtDocument,
        expected_version: i64,
    ) -> Result<i64, StorageError> {
        let inner = self.inner.lock().await;
        if stored_version(&inner, &document.document_id) != expected_version {
            return Err(StorageError::ConcurrentConflict {
                document_id: document.document_id.clone(),
                expected_version,
            });
        }
        snapshot.documents.insert(
            document.document_id.clone(),
            (document.clone(), expected_version),
        );
        Ok(expected_version + 1)
    }

    async fn record_faults(
        &self,
        snapshot: &mut InMemorySnapshot,
        faults: &[Fault],
    ) -> Result<usize, StorageError> {
        let inner = self.inner.lock().await;
        let mut added = 0;
        for fault in faults {
            let known = inner.fault_ids.contains(&fault.fault_id)
                || snapshot.faults.iter().any(|f| f.fault_id == fault.fault_id);
            if !known {
                snapshot.faults.push(fault.clone());
                added += 1;
            }
        }
        Ok(added)
    }

    async fn get_document(&self, document_id: &str) -> Result<StoredDocument, StorageError> {
        let inner = self.inner.lock().await;
        inner
            .documents
            .get(document_id)
            .cloned()
            .ok_or_else(|| StorageError::DocumentNotFound {
                document_id: document_id.to_string(),
            })
    }

    async fn list_faults(&self, document_id: &str) -> Result<Vec<Fault>, StorageError> {
        let inner = self.inner.lock().await;
        Ok(inner.faults.get(document_id).cloned().unwrap_or_default())
    }
}
