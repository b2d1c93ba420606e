//! ce-sync: turns device merge requests into committed session state.
//!
//! The [`SyncCoordinator`] validates a request, queues it behind earlier
//! requests for the same session, and runs read-merge-analyze-write inside
//! one storage snapshot. Transient storage failures are retried with
//! exponential backoff ([`RetryPolicy`]); when retries run out the caller
//! gets [`SyncError::SyncFailed`] with the untouched request.

pub mod coordinator;
pub mod error;
pub mod retry;

pub use coordinator::{PendingMerge, SessionView, SyncConfig, SyncCoordinator};
pub use error::SyncError;
pub use retry::RetryPolicy;
