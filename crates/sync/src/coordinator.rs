//! SyncCoordinator: ordered, retried, atomic merges per session.
//!
//! Requests are validated on the caller's task, then handed to a per-session
//! worker over an unbounded channel. The worker drains its queue strictly in
//! arrival order, so two batches for one session never merge concurrently
//! and never overtake each other. Different sessions have different workers
//! and proceed in parallel, bounded by a semaphore.
//!
//! Each attempt runs inside one storage snapshot:
//!
//! 1. read the stored document and its version
//! 2. refuse a batch that skips one of its device's earlier batches, then
//!    fold it onto the heads the device had observed
//! 3. merge, analyze, write document + faults, commit
//!
//! A commit that fails transiently (backend unavailable, version conflict)
//! re-runs the whole attempt. A worker that outlives its caller's timeout
//! keeps going; the caller was told `queued`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use ce_analyze::AnalysisReport;
use ce_core::{CrdtDocument, ScenarioDefinition, StepRecord};
use ce_interchange::{InterchangeError, MergeRequest, MergeResponse, ValidatedRequest};
use ce_storage::{ScenarioSource, SessionStore, StorageError, StoredDocument};
use tokio::sync::{mpsc, oneshot, Mutex, Semaphore};
use tracing::{debug, error, info, warn};

use crate::error::SyncError;
use crate::retry::RetryPolicy;

/// Tunables for the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    pub retry: RetryPolicy,
    /// Upper bound on one read-merge-write attempt.
    pub merge_timeout: Duration,
    /// Sessions merging at the same time.
    pub max_concurrent_merges: usize,
    /// A session worker with an empty queue for this long shuts down.
    pub worker_idle: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            retry: RetryPolicy::default(),
            merge_timeout: Duration::from_secs(5),
            max_concurrent_merges: 32,
            worker_idle: Duration::from_secs(30),
        }
    }
}

/// Committed state of a session with its analysis.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub stored: StoredDocument,
    /// Resolved record per step, flags applied.
    pub resolved: BTreeMap<String, StepRecord>,
    pub report: AnalysisReport,
}

type Reply = Result<MergeResponse, SyncError>;

struct Job {
    request: MergeRequest,
    validated: ValidatedRequest,
    reply: oneshot::Sender<Reply>,
}

/// A request accepted into its session's queue.
pub struct PendingMerge {
    document_id: String,
    reply: oneshot::Receiver<Reply>,
}

impl PendingMerge {
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Wait for the merge to finish.
    pub async fn wait(self) -> Reply {
        match self.reply.await {
            Ok(reply) => reply,
            Err(_) => Err(SyncError::Storage(StorageError::Backend(
                "merge worker stopped before replying".to_string(),
            ))),
        }
    }

    /// Wait at most `timeout`; past it the caller gets `queued` and the
    /// merge finishes in the background.
    pub async fn wait_timeout(self, timeout: Duration) -> Reply {
        let document_id = self.document_id.clone();
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(reply) => reply,
            Err(_) => {
                info!(document_id = %document_id, "caller timed out; merge continues in background");
                Ok(MergeResponse::queued(&document_id))
            }
        }
    }
}

struct Inner<S, C> {
    store: S,
    scenarios: C,
    config: SyncConfig,
    queues: Mutex<HashMap<String, mpsc::UnboundedSender<Job>>>,
    permits: Semaphore,
}

/// Orders, retries and commits merges. Cheap to clone.
pub struct SyncCoordinator<S, C> {
    inner: Arc<Inner<S, C>>,
}

impl<S, C> Clone for SyncCoordinator<S, C> {
    fn clone(&self) -> Self {
        SyncCoordinator {
            inner: self.inner.clone(),
        }
    }
}

impl<S: SessionStore, C: ScenarioSource> SyncCoordinator<S, C> {
    pub fn new(store: S, scenarios: C, config: SyncConfig) -> Self {
        SyncCoordinator {
            inner: Arc::new(Inner {
                store,
                scenarios,
                config,
                queues: Mutex::new(HashMap::new()),
                permits: Semaphore::new(config.max_concurrent_merges.max(1)),
            }),
        }
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub fn scenarios(&self) -> &C {
        &self.inner.scenarios
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Validate `request` and queue it behind earlier requests for the
    /// same session. Invalid requests are rejected here and never queued.
    pub async fn enqueue(&self, request: MergeRequest) -> Result<PendingMerge, SyncError> {
        let validated = request.validate()?;
        let document_id = validated.document_id.clone();
        let (reply, rx) = oneshot::channel();
        let job = Job {
            request,
            validated,
            reply,
        };

        let mut queues = self.inner.queues.lock().await;
        let job = match queues.get(&document_id) {
            Some(sender) => match sender.send(job) {
                Ok(()) => None,
                Err(mpsc::error::SendError(job)) => Some(job),
            },
            None => Some(job),
        };
        if let Some(job) = job {
            let (sender, receiver) = mpsc::unbounded_channel();
            // The receiver is alive until the worker exits, which needs the
            // queue lock we hold.
            let _ = sender.send(job);
            queues.insert(document_id.clone(), sender);
            debug!(document_id = %document_id, "starting session worker");
            tokio::spawn(run_worker(
                self.inner.clone(),
                document_id.clone(),
                receiver,
            ));
        }

        Ok(PendingMerge {
            document_id,
            reply: rx,
        })
    }

    /// Submit and wait for the merge result.
    pub async fn submit(&self, request: MergeRequest) -> Result<MergeResponse, SyncError> {
        self.enqueue(request).await?.wait().await
    }

    /// Submit and wait at most `timeout`; returns `queued` past it.
    pub async fn submit_with_timeout(
        &self,
        request: MergeRequest,
        timeout: Duration,
    ) -> Result<MergeResponse, SyncError> {
        self.enqueue(request).await?.wait_timeout(timeout).await
    }

    /// The committed document of a session, analyzed against its scenario.
    pub async fn session(&self, document_id: &str) -> Result<SessionView, SyncError> {
        let stored = match self.inner.store.get_document(document_id).await {
            Ok(stored) => stored,
            Err(StorageError::DocumentNotFound { .. }) => {
                return Err(SyncError::SessionNotFound {
                    document_id: document_id.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let scenario = self
            .lookup_scenario(&stored.document.scenario_id)
            .await?;
        let resolved = stored.document.resolved_steps(Some(&scenario));
        let report = ce_analyze::analyze(&scenario, &stored.document);
        Ok(SessionView {
            stored,
            resolved,
            report,
        })
    }

    async fn lookup_scenario(&self, scenario_id: &str) -> Result<ScenarioDefinition, SyncError> {
        self.inner
            .scenarios
            .get_scenario(scenario_id)
            .await?
            .ok_or_else(|| SyncError::UnknownScenario {
                scenario_id: scenario_id.to_string(),
            })
    }
}

async fn run_worker<S: SessionStore, C: ScenarioSource>(
    inner: Arc<Inner<S, C>>,
    document_id: String,
    mut receiver: mpsc::UnboundedReceiver<Job>,
) {
    loop {
        let job = match tokio::time::timeout(inner.config.worker_idle, receiver.recv()).await {
            Ok(Some(job)) => job,
            Ok(None) => break,
            Err(_) => {
                let mut queues = inner.queues.lock().await;
                if receiver.is_empty() {
                    queues.remove(&document_id);
                    debug!(document_id = %document_id, "session worker idle; stopping");
                    break;
                }
                continue;
            }
        };

        let permit = match inner.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let reply = process(&inner, job.request, &job.validated).await;
        drop(permit);

        if job.reply.send(reply).is_err() {
            debug!(document_id = %document_id, "caller no longer waiting for merge result");
        }
    }
}

enum AttemptError {
    Retryable(String),
    OutOfOrder(InterchangeError),
    Fatal(SyncError),
}

impl From<StorageError> for AttemptError {
    fn from(e: StorageError) -> Self {
        if e.is_transient() {
            AttemptError::Retryable(e.to_string())
        } else {
            AttemptError::Fatal(SyncError::Storage(e))
        }
    }
}

async fn process<S: SessionStore, C: ScenarioSource>(
    inner: &Inner<S, C>,
    request: MergeRequest,
    validated: &ValidatedRequest,
) -> Reply {
    let policy = inner.config.retry;
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        let outcome =
            tokio::time::timeout(inner.config.merge_timeout, attempt_merge(inner, validated)).await;
        match outcome {
            Ok(Ok(response)) => {
                info!(
                    document_id = %validated.document_id,
                    actor = %validated.actor_id,
                    attempt,
                    conflicts = response.conflicts_resolved,
                    faults = response.faults.len(),
                    "merged batch"
                );
                return Ok(response);
            }
            Ok(Err(AttemptError::Fatal(SyncError::Storage(e)))) => {
                last_error = e.to_string();
                break;
            }
            Ok(Err(AttemptError::OutOfOrder(reason))) => {
                warn!(
                    document_id = %validated.document_id,
                    error = %reason,
                    "refusing out-of-order batch"
                );
                return Err(SyncError::OutOfOrder {
                    document_id: validated.document_id.clone(),
                    reason,
                    request: Box::new(request),
                });
            }
            Ok(Err(AttemptError::Fatal(e))) => return Err(e),
            Ok(Err(AttemptError::Retryable(msg))) => last_error = msg,
            Err(_) => {
                last_error = format!(
                    "merge exceeded {}ms",
                    inner.config.merge_timeout.as_millis()
                )
            }
        }

        if attempt < max_attempts {
            let delay = policy.delay(attempt);
            warn!(
                document_id = %validated.document_id,
                attempt,
                max_attempts,
                error = %last_error,
                backoff_ms = delay.as_millis() as u64,
                "merge attempt failed; retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    error!(
        document_id = %validated.document_id,
        error = %last_error,
        "sync failed; returning payload to device"
    );
    Err(SyncError::SyncFailed {
        document_id: validated.document_id.clone(),
        attempts: max_attempts,
        last_error,
        request: Box::new(request),
    })
}

async fn attempt_merge<S: SessionStore, C: ScenarioSource>(
    inner: &Inner<S, C>,
    validated: &ValidatedRequest,
) -> Result<MergeResponse, AttemptError> {
    let mut snap = inner.store.begin_snapshot().await?;
    match merge_in_snapshot(inner, validated, &mut snap).await {
        Ok(response) => {
            inner.store.commit_snapshot(snap).await?;
            Ok(response)
        }
        Err(e) => {
            if let Err(abort) = inner.store.abort_snapshot(snap).await {
                warn!(error = %abort, "abort after failed merge attempt also failed");
            }
            Err(e)
        }
    }
}

async fn merge_in_snapshot<S: SessionStore, C: ScenarioSource>(
    inner: &Inner<S, C>,
    validated: &ValidatedRequest,
    snap: &mut S::Snapshot,
) -> Result<MergeResponse, AttemptError> {
    let stored = inner
        .store
        .get_document_for_update(snap, &validated.document_id)
        .await?;
    let (local, version) = match stored {
        Some(stored) => (stored.document, stored.version),
        None => (
            CrdtDocument::new(validated.document_id.clone(), validated.scenario_id.clone()),
            0,
        ),
    };

    let scenario_id = if validated.scenario_id.is_empty() {
        local.scenario_id.clone()
    } else {
        validated.scenario_id.clone()
    };
    let scenario = inner
        .scenarios
        .get_scenario(&scenario_id)
        .await
        .map_err(|e| AttemptError::Fatal(e.into()))?
        .ok_or_else(|| AttemptError::Fatal(SyncError::UnknownScenario { scenario_id }))?;

    validated
        .check_sequence(&local)
        .map_err(AttemptError::OutOfOrder)?;
    let incoming = validated.to_document(&local);
    let outcome = ce_analyze::merge_engine(&scenario)
        .merge(&local, &incoming)
        .map_err(|e| AttemptError::Fatal(e.into()))?;
    let report = ce_analyze::analyze(&scenario, &outcome.document);

    let document = &outcome.document;
    inner.store.write_document(snap, document, version).await?;
    let new_faults = inner.store.record_faults(snap, &report.faults).await?;
    debug!(
        document_id = %document.document_id,
        version = version + 1,
        new_faults,
        "merge staged"
    );

    Ok(MergeResponse::merged(&outcome, &report))
}
