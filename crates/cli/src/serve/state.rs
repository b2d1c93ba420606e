//! Application state shared across request handlers.

use std::time::Duration;

use ce_storage::{InMemoryStore, StaticScenarios};
use ce_sync::SyncCoordinator;

pub(crate) type Coordinator = SyncCoordinator<InMemoryStore, StaticScenarios>;

pub(crate) struct AppState {
    pub(crate) coordinator: Coordinator,
    /// How long a merge request waits before answering `queued`.
    pub(crate) round_trip_timeout: Duration,
    /// Optional API key for authentication. None = no auth required.
    pub(crate) api_key: Option<String>,
}
