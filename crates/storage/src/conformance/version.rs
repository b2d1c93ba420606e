use std::future::Future;

use super::{commit_document, make_document, TestResult};
use crate::{SessionStore, StorageError};

pub(super) async fn run_version_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "version",
            "sequential_writes_increment_version",
            sequential_writes_increment_version(factory).await,
        ),
        TestResult::from_result(
            "version",
            "stale_version_is_concurrent_conflict",
            stale_version_is_concurrent_conflict(factory).await,
        ),
        TestResult::from_result(
            "version",
            "conflict_detected_at_commit",
            conflict_detected_at_commit(factory).await,
        ),
        TestResult::from_result(
            "version",
            "conflict_is_transient",
            conflict_is_transient(factory).await,
        ),
    ]
}

async fn sequential_writes_increment_version<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    for expected in 0..3 {
        let version = commit_document(&storage, &make_document("doc-1", expected + 1)?, expected)
            .await
            .map_err(|e| format!("write at {expected}: {e}"))?;
        if version != expected + 1 {
            return Err(format!("expected version {}, got {version}", expected + 1));
        }
    }
    Ok(())
}

async fn stale_version_is_concurrent_conflict<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    commit_document(&storage, &make_document("doc-1", 1)?, 0)
        .await
        .map_err(|e| format!("first write: {e}"))?;

    match commit_document(&storage, &make_document("doc-1", 2)?, 0).await {
        Err(StorageError::ConcurrentConflict {
            document_id,
            expected_version,
        }) if document_id == "doc-1" && expected_version == 0 => Ok(()),
        Err(e) => Err(format!("expected ConcurrentConflict, got {e}")),
        Ok(v) => Err(format!("stale write succeeded at version {v}")),
    }
}

/// Two snapshots both read version 0; the second commit must fail.
async fn conflict_detected_at_commit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let mut first = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin first: {e}"))?;
    let mut second = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin second: {e}"))?;

    storage
        .write_document(&mut first, &make_document("doc-1", 1)?, 0)
        .await
        .map_err(|e| format!("write first: {e}"))?;
    let second_write = storage
        .write_document(&mut second, &make_document("doc-1", 2)?, 0)
        .await;
    storage
        .commit_snapshot(first)
        .await
        .map_err(|e| format!("commit first: {e}"))?;

    let outcome = match second_write {
        Ok(_) => storage.commit_snapshot(second).await,
        Err(e) => {
            let _ = storage.abort_snapshot(second).await;
            Err(e)
        }
    };
    match outcome {
        Err(StorageError::ConcurrentConflict { .. }) => {}
        Err(e) => return Err(format!("expected ConcurrentConflict, got {e}")),
        Ok(()) => return Err("both writers at version 0 committed".to_string()),
    }

    let stored = storage
        .get_document("doc-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if stored.version != 1 || stored.document != make_document("doc-1", 1)? {
        return Err("losing writer's document was stored".to_string());
    }
    Ok(())
}

async fn conflict_is_transient<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    commit_document(&storage, &make_document("doc-1", 1)?, 0)
        .await
        .map_err(|e| format!("first write: {e}"))?;
    match commit_document(&storage, &make_document("doc-1", 2)?, 0).await {
        Err(e) if e.is_transient() => Ok(()),
        Err(e) => Err(format!("conflict should be retryable: {e}")),
        Ok(_) => Err("stale write succeeded".to_string()),
    }
}
