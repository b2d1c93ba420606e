use std::future::Future;

use super::{commit_document, make_document, TestResult};
use crate::{SessionStore, StorageError};

pub(super) async fn run_init_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "init",
            "first_write_creates_version_1",
            first_write_creates_version_1(factory).await,
        ),
        TestResult::from_result(
            "init",
            "missing_document_is_not_found",
            missing_document_is_not_found(factory).await,
        ),
        TestResult::from_result(
            "init",
            "missing_document_for_update_is_none",
            missing_document_for_update_is_none(factory).await,
        ),
        TestResult::from_result(
            "init",
            "committed_document_round_trips",
            committed_document_round_trips(factory).await,
        ),
        TestResult::from_result(
            "init",
            "documents_are_independent",
            documents_are_independent(factory).await,
        ),
    ]
}

async fn first_write_creates_version_1<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let version = commit_document(&storage, &make_document("doc-1", 1)?, 0)
        .await
        .map_err(|e| format!("write: {e}"))?;
    if version != 1 {
        return Err(format!("expected version 1, got {version}"));
    }
    let stored = storage
        .get_document("doc-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if stored.version != 1 {
        return Err(format!("stored version {} != 1", stored.version));
    }
    Ok(())
}

async fn missing_document_is_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    match storage.get_document("nope").await {
        Err(StorageError::DocumentNotFound { document_id }) if document_id == "nope" => Ok(()),
        Err(e) => Err(format!("expected DocumentNotFound, got {e}")),
        Ok(_) => Err("expected DocumentNotFound, got a document".to_string()),
    }
}

async fn missing_document_for_update_is_none<S, F, Fut>(factory: &F) -> Result<(), String>
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
    let found = storage
        .get_document_for_update(&mut snap, "nope")
        .await
        .map_err(|e| format!("get: {e}"))?;
    storage
        .abort_snapshot(snap)
        .await
        .map_err(|e| format!("abort: {e}"))?;
    match found {
        None => Ok(()),
        Some(d) => Err(format!("expected None, got version {}", d.version)),
    }
}

async fn committed_document_round_trips<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let document = make_document("doc-1", 3)?;
    commit_document(&storage, &document, 0)
        .await
        .map_err(|e| format!("write: {e}"))?;
    let stored = storage
        .get_document("doc-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if stored.document != document {
        return Err("stored document differs from the one written".to_string());
    }
    Ok(())
}

async fn documents_are_independent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    commit_document(&storage, &make_document("doc-1", 1)?, 0)
        .await
        .map_err(|e| format!("write doc-1: {e}"))?;
    commit_document(&storage, &make_document("doc-1", 2)?, 1)
        .await
        .map_err(|e| format!("rewrite doc-1: {e}"))?;
    let version = commit_document(&storage, &make_document("doc-2", 1)?, 0)
        .await
        .map_err(|e| format!("write doc-2: {e}"))?;
    if version != 1 {
        return Err(format!("doc-2 should start at version 1, got {version}"));
    }
    Ok(())
}
