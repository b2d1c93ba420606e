use std::future::Future;

use super::{make_document, make_fault, TestResult};
use crate::{SessionStore, StorageError};
use ce_analyze::Severity;

pub(super) async fn run_snapshot_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "snapshot",
            "uncommitted_write_is_invisible",
            uncommitted_write_is_invisible(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "aborted_write_is_discarded",
            aborted_write_is_discarded(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "aborted_faults_are_discarded",
            aborted_faults_are_discarded(factory).await,
        ),
    ]
}

async fn uncommitted_write_is_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .write_document(&mut snap, &make_document("doc-1", 1)?, 0)
        .await
        .map_err(|e| format!("write: {e}"))?;

    let visible = storage.get_document("doc-1").await;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    match visible {
        Err(StorageError::DocumentNotFound { .. }) => {}
        Err(e) => return Err(format!("unexpected error before commit: {e}")),
        Ok(_) => return Err("write visible before commit".to_string()),
    }
    storage
        .get_document("doc-1")
        .await
        .map_err(|e| format!("not visible after commit: {e}"))?;
    Ok(())
}

async fn aborted_write_is_discarded<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .write_document(&mut snap, &make_document("doc-1", 1)?, 0)
        .await
        .map_err(|e| format!("write: {e}"))?;
    storage
        .abort_snapshot(snap)
        .await
        .map_err(|e| format!("abort: {e}"))?;

    match storage.get_document("doc-1").await {
        Err(StorageError::DocumentNotFound { .. }) => Ok(()),
        Err(e) => Err(format!("unexpected error: {e}")),
        Ok(_) => Err("aborted write became visible".to_string()),
    }
}

async fn aborted_faults_are_discarded<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .record_faults(&mut snap, &[make_fault("doc-1", "s1", Severity::Medium)])
        .await
        .map_err(|e| format!("record: {e}"))?;
    storage
        .abort_snapshot(snap)
        .await
        .map_err(|e| format!("abort: {e}"))?;

    let faults = storage
        .list_faults("doc-1")
        .await
        .map_err(|e| format!("list: {e}"))?;
    if !faults.is_empty() {
        return Err(format!("{} aborted faults visible", faults.len()));
    }
    Ok(())
}
