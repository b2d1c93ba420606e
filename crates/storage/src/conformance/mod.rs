//! Conformance test suite for `SessionStore` implementations.
//!
//! This module provides a backend-agnostic test suite that any `SessionStore`
//! implementation can run to verify correctness. The suite covers:
//!
//! - **Initialization**: first write, reads of missing documents
//! - **Snapshot isolation**: uncommitted writes invisible, aborted writes discarded
//! - **Version validation / OCC**: stale writers get `ConcurrentConflict`
//! - **Faults**: insert-if-absent by fault id, atomic with the document write
//! - **Concurrency**: racing writers at the same version, exactly one wins
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty storage instance for each test:
//!
//! ```ignore
//! use ce_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn postgres_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_test_postgres_store().await
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod concurrent;
mod faults;
mod init;
mod snapshot;
mod version;

use std::fmt;
use std::future::Future;

use ce_analyze::{DeviationCode, Fault, FaultKey, Severity, FAULT_CATEGORY};
use ce_core::{CrdtDocument, StepRecord, StepStatus, VectorClock};

use crate::{SessionStore, StorageError};

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "init", "snapshot", "faults").
    pub category: String,
    /// Test name (e.g. "first_write_creates_version_1").
    pub name: String,
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        let (passed, message) = match result {
            Ok(()) => (true, None),
            Err(msg) => (false, Some(msg)),
        };
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed,
            message,
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// storage instance, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(init::run_init_tests(&factory).await);
    results.extend(snapshot::run_snapshot_tests(&factory).await);
    results.extend(version::run_version_tests(&factory).await);
    results.extend(faults::run_fault_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn make_document(document_id: &str, counter: i64) -> Result<CrdtDocument, String> {
    let clock = VectorClock::from_signed([("tablet-a", counter)]).map_err(|e| e.to_string())?;
    let mut document = CrdtDocument::new(document_id, "panel");
    document.apply(
        StepRecord::new("s1", "tablet-a", clock, "2025-01-01T00:00:00Z")
            .with_status(StepStatus::InProgress),
    );
    Ok(document)
}

fn make_fault(session_id: &str, step_id: &str, severity: Severity) -> Fault {
    let key = FaultKey {
        session_id: session_id.to_string(),
        step_id: step_id.to_string(),
        severity,
    };
    Fault {
        fault_id: key.fingerprint(),
        session_id: session_id.to_string(),
        deviation_ref: step_id.to_string(),
        severity,
        code: Some(DeviationCode::ModerateDelay),
        category: FAULT_CATEGORY.to_string(),
        description: format!("C&E test deviation: {} delayed by 10s", step_id),
        evidence_refs: Vec::new(),
    }
}

/// Write `document` at `expected_version` in its own snapshot and commit.
async fn commit_document<S: SessionStore>(
    storage: &S,
    document: &CrdtDocument,
    expected_version: i64,
) -> Result<i64, StorageError> {
    let mut snap = storage.begin_snapshot().await?;
    match storage
        .write_document(&mut snap, document, expected_version)
        .await
    {
        Ok(version) => {
            storage.commit_snapshot(snap).await?;
            Ok(version)
        }
        Err(e) => {
            let _ = storage.abort_snapshot(snap).await;
            Err(e)
        }
    }
}
