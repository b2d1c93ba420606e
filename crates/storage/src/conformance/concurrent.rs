use std::future::Future;
use std::sync::Arc;

use super::{commit_document, make_document, TestResult};
use crate::{SessionStore, StorageError};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "concurrent",
            "concurrent_writes_exactly_one_wins",
            concurrent_writes_exactly_one_wins(factory).await,
        ),
        TestResult::from_result(
            "concurrent",
            "concurrent_writes_different_documents_all_succeed",
            concurrent_writes_different_documents_all_succeed(factory).await,
        ),
    ]
}

/// N tasks each open a snapshot and write the same document at version 1.
/// Exactly one commit succeeds; the rest must get ConcurrentConflict.
async fn concurrent_writes_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    commit_document(storage.as_ref(), &make_document("doc-1", 1)?, 0)
        .await
        .map_err(|e| format!("initial write: {e}"))?;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        let document = make_document("doc-1", 2 + i as i64)?;
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let written = s.write_document(&mut snap, &document, 1).await;
            match written {
                Ok(_) => match s.commit_snapshot(snap).await {
                    Ok(()) => Ok(true),
                    Err(StorageError::ConcurrentConflict { .. }) => Ok(false),
                    Err(e) => Err(e),
                },
                Err(StorageError::ConcurrentConflict { .. }) => {
                    s.abort_snapshot(snap).await?;
                    Ok(false)
                }
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }

    let mut winners = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        }
    }
    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }

    let stored = storage
        .get_document("doc-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if stored.version != 2 {
        return Err(format!("expected final version 2, got {}", stored.version));
    }
    Ok(())
}

async fn concurrent_writes_different_documents_all_succeed<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        let document = make_document(&format!("doc-{i}"), 1)?;
        handles.push(tokio::spawn(async move {
            commit_document(s.as_ref(), &document, 0).await
        }));
    }
    for handle in handles {
        handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error: {e}"))?;
    }
    for i in 0..N {
        storage
            .get_document(&format!("doc-{i}"))
            .await
            .map_err(|e| format!("doc-{i} missing: {e}"))?;
    }
    Ok(())
}
