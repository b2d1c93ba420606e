use std::future::Future;

use ce_analyze::Severity;

use super::{make_document, make_fault, TestResult};
use crate::SessionStore;

pub(super) async fn run_fault_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "faults",
            "faults_commit_with_document",
            faults_commit_with_document(factory).await,
        ),
        TestResult::from_result(
            "faults",
            "duplicate_fault_id_is_ignored",
            duplicate_fault_id_is_ignored(factory).await,
        ),
        TestResult::from_result(
            "faults",
            "duplicate_within_one_snapshot_is_ignored",
            duplicate_within_one_snapshot_is_ignored(factory).await,
        ),
        TestResult::from_result(
            "faults",
            "different_severity_is_a_new_fault",
            different_severity_is_a_new_fault(factory).await,
        ),
        TestResult::from_result(
            "faults",
            "faults_listed_per_session",
            faults_listed_per_session(factory).await,
        ),
    ]
}

async fn record_and_commit<S: SessionStore>(
    storage: &S,
    faults: &[ce_analyze::Fault],
) -> Result<usize, String> {
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    let added = storage
        .record_faults(&mut snap, faults)
        .await
        .map_err(|e| format!("record: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;
    Ok(added)
}

async fn faults_commit_with_document<S, F, Fut>(factory: &F) -> Result<(), String>
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
        .record_faults(&mut snap, &[make_fault("doc-1", "s1", Severity::Medium)])
        .await
        .map_err(|e| format!("record: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    storage
        .get_document("doc-1")
        .await
        .map_err(|e| format!("document missing: {e}"))?;
    let faults = storage
        .list_faults("doc-1")
        .await
        .map_err(|e| format!("list: {e}"))?;
    if faults.len() != 1 {
        return Err(format!("expected 1 fault, got {}", faults.len()));
    }
    Ok(())
}

async fn duplicate_fault_id_is_ignored<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let fault = make_fault("doc-1", "s1", Severity::Medium);
    let first = record_and_commit(&storage, std::slice::from_ref(&fault)).await?;
    let second = record_and_commit(&storage, std::slice::from_ref(&fault)).await?;
    if (first, second) != (1, 0) {
        return Err(format!("expected (1, 0) new faults, got ({first}, {second})"));
    }
    let faults = storage
        .list_faults("doc-1")
        .await
        .map_err(|e| format!("list: {e}"))?;
    if faults.len() != 1 {
        return Err(format!("duplicate fault stored: {} faults", faults.len()));
    }
    Ok(())
}

async fn duplicate_within_one_snapshot_is_ignored<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let fault = make_fault("doc-1", "s1", Severity::High);
    let added = record_and_commit(&storage, &[fault.clone(), fault]).await?;
    if added != 1 {
        return Err(format!("expected 1 new fault, got {added}"));
    }
    Ok(())
}

async fn different_severity_is_a_new_fault<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    record_and_commit(&storage, &[make_fault("doc-1", "s1", Severity::Medium)]).await?;
    let added = record_and_commit(&storage, &[make_fault("doc-1", "s1", Severity::High)]).await?;
    if added != 1 {
        return Err(format!("escalated severity should be recorded, got {added}"));
    }
    Ok(())
}

async fn faults_listed_per_session<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    record_and_commit(
        &storage,
        &[
            make_fault("doc-1", "s1", Severity::Medium),
            make_fault("doc-2", "s1", Severity::Medium),
        ],
    )
    .await?;
    let faults = storage
        .list_faults("doc-2")
        .await
        .map_err(|e| format!("list: {e}"))?;
    if faults.len() != 1 || faults[0].session_id != "doc-2" {
        return Err(format!("expected only doc-2's fault, got {}", faults.len()));
    }
    let none = storage
        .list_faults("doc-3")
        .await
        .map_err(|e| format!("list: {e}"))?;
    if !none.is_empty() {
        return Err("unknown session has faults".to_string());
    }
    Ok(())
}
