use ce_core::CrdtDocument;
use serde::{Deserialize, Serialize};

/// A session document as committed in the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub document: CrdtDocument,
    /// Incremented on every committed write; the first write is version 1.
    pub version: i64,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub updated_at: String,
}
