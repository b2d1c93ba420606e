pub mod conformance;
mod error;
mod memory;
mod record;
mod scenarios;
mod traits;

pub use error::StorageError;
pub use memory::{InMemorySnapshot, InMemoryStore};
pub use record::StoredDocument;
pub use scenarios::{ScenarioSource, StaticScenarios};
pub use traits::SessionStore;
