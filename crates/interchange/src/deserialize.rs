//! Parsing and validation of merge requests.
//!
//! [`parse_request`] turns a `serde_json::Value` into a [`MergeRequest`];
//! [`MergeRequest::validate`] then checks the clock, every timestamp and
//! every change payload, producing a [`ValidatedRequest`]. Nothing reaches
//! the merge engine without passing both.

use std::fmt;
use std::str::FromStr;

use ce_core::{ClockError, VectorClock};
use rust_decimal::Decimal;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::types::*;

/// Errors while parsing or validating a merge request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterchangeError {
    /// The request is missing a required top-level field.
    MissingField { field: String },
    /// The request JSON does not have the expected shape.
    Malformed(String),
    /// Negative counter, empty actor, or a writer that did not tick.
    InvalidClock(ClockError),
    /// A timestamp that is not RFC 3339.
    InvalidTimestamp { field: String, value: String },
    /// A change with an unknown type or an unusable payload.
    InvalidChange {
        step_id: String,
        change_type: String,
        message: String,
    },
    /// The request body names a different session than the caller addressed.
    DocumentMismatch { expected: String, found: String },
    /// The batch skips counters the session has not yet seen from its
    /// device; an earlier batch must be merged first.
    OutOfOrder {
        actor_id: String,
        known: u64,
        received: u64,
    },
}

impl fmt::Display for InterchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterchangeError::MissingField { field } => {
                write!(f, "merge request missing required field: '{}'", field)
            }
            InterchangeError::Malformed(msg) => write!(f, "malformed merge request: {}", msg),
            InterchangeError::InvalidClock(e) => write!(f, "{}", e),
            InterchangeError::InvalidTimestamp { field, value } => {
                write!(f, "invalid timestamp in '{}': '{}' is not RFC 3339", field, value)
            }
            InterchangeError::InvalidChange {
                step_id,
                change_type,
                message,
            } => write!(f, "change '{}' on step '{}': {}", change_type, step_id, message),
            InterchangeError::DocumentMismatch { expected, found } => write!(
                f,
                "document mismatch: request addressed to '{}' but body names '{}'",
                expected, found
            ),
            InterchangeError::OutOfOrder {
                actor_id,
                known,
                received,
            } => write!(
                f,
                "out-of-order batch: '{}' sent counter {} but the session has only seen up to {}; resubmit earlier batches first",
                actor_id, received, known
            ),
        }
    }
}

impl std::error::Error for InterchangeError {}

impl From<ClockError> for InterchangeError {
    fn from(e: ClockError) -> Self {
        InterchangeError::InvalidClock(e)
    }
}

/// Deserialize a merge request from JSON.
pub fn parse_request(value: &serde_json::Value) -> Result<MergeRequest, InterchangeError> {
    for field in ["document_id", "vector_clock", "device_info"] {
        if value.get(field).is_none() {
            return Err(InterchangeError::MissingField {
                field: field.to_string(),
            });
        }
    }
    serde_json::from_value(value.clone()).map_err(|e| InterchangeError::Malformed(e.to_string()))
}

/// Parse an RFC 3339 timestamp into nanoseconds since the epoch.
pub fn parse_timestamp(field: &str, value: &str) -> Result<i128, InterchangeError> {
    OffsetDateTime::parse(value, &Rfc3339)
        .map(|t| t.unix_timestamp_nanos())
        .map_err(|_| InterchangeError::InvalidTimestamp {
            field: field.to_string(),
            value: value.to_string(),
        })
}

impl MergeRequest {
    /// Reject the request if its body names a session other than `expected`.
    pub fn check_document(&self, expected: &str) -> Result<(), InterchangeError> {
        if self.document_id != expected {
            return Err(InterchangeError::DocumentMismatch {
                expected: expected.to_string(),
                found: self.document_id.clone(),
            });
        }
        Ok(())
    }

    /// Validate the clock, timestamps and change payloads.
    ///
    /// A batch with changes must carry a clock in which the writing device
    /// has ticked its own entry; without it the new writes could not be
    /// ordered against the device's earlier ones.
    pub fn validate(&self) -> Result<ValidatedRequest, InterchangeError> {
        if self.document_id.is_empty() {
            return Err(InterchangeError::MissingField {
                field: "document_id".to_string(),
            });
        }
        let actor_id = self.device_info.actor_id.clone();
        if actor_id.is_empty() {
            return Err(InterchangeError::MissingField {
                field: "device_info.actor_id".to_string(),
            });
        }

        let clock =
            VectorClock::from_signed(self.vector_clock.iter().map(|(a, c)| (a.as_str(), *c)))?;
        if !self.changes.is_empty() && clock.get(&actor_id) == 0 {
            return Err(ClockError::MissingWriterEntry { actor: actor_id }.into());
        }

        let changes = self
            .changes
            .iter()
            .map(validate_change)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ValidatedRequest {
            document_id: self.document_id.clone(),
            scenario_id: self.scenario_id.clone(),
            actor_id,
            clock,
            changes,
        })
    }
}

fn validate_change(change: &Change) -> Result<StepChange, InterchangeError> {
    let invalid = |message: String| InterchangeError::InvalidChange {
        step_id: change.step_id.clone(),
        change_type: change.change_type.clone(),
        message,
    };
    if change.step_id.is_empty() {
        return Err(invalid("empty step_id".to_string()));
    }
    let timestamp_nanos = parse_timestamp("timestamp", &change.timestamp)?;

    let kind = match change.change_type.as_str() {
        "step_started" => ChangeKind::Started {
            started_at: data_timestamp(change, "started_at")?
                .unwrap_or_else(|| change.timestamp.clone()),
        },
        "step_completed" => ChangeKind::Completed {
            completed_at: data_timestamp(change, "completed_at")?
                .unwrap_or_else(|| change.timestamp.clone()),
            actual_duration: data_duration(change)?
                .ok_or_else(|| invalid("missing 'actual_duration'".to_string()))?,
        },
        "step_failed" => ChangeKind::Failed {
            completed_at: data_timestamp(change, "completed_at")?,
            actual_duration: data_duration(change)?,
        },
        "step_skipped" => ChangeKind::Skipped,
        "notes_set" => ChangeKind::NotesSet {
            notes: data_str(change, "notes")
                .ok_or_else(|| invalid("missing 'notes'".to_string()))?,
        },
        "evidence_linked" => {
            let evidence_id = data_str(change, "evidence_id")
                .filter(|id| !id.is_empty())
                .ok_or_else(|| invalid("missing 'evidence_id'".to_string()))?;
            ChangeKind::EvidenceLinked { evidence_id }
        }
        other => return Err(invalid(format!("unknown change type '{}'", other))),
    };

    Ok(StepChange {
        step_id: change.step_id.clone(),
        timestamp: change.timestamp.clone(),
        timestamp_nanos,
        kind,
    })
}

fn data_str(change: &Change, key: &str) -> Option<String> {
    change
        .data
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn data_timestamp(change: &Change, key: &str) -> Result<Option<String>, InterchangeError> {
    match data_str(change, key) {
        Some(value) => {
            parse_timestamp(key, &value)?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// `actual_duration` as a JSON number or decimal string; never negative.
fn data_duration(change: &Change) -> Result<Option<Decimal>, InterchangeError> {
    let invalid = |message: String| InterchangeError::InvalidChange {
        step_id: change.step_id.clone(),
        change_type: change.change_type.clone(),
        message,
    };
    let raw = match change.data.get("actual_duration") {
        None | Some(serde_json::Value::Null) => return Ok(None),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(other) => return Err(invalid(format!("'actual_duration' is not a number: {}", other))),
    };
    let seconds = Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map_err(|_| invalid(format!("'actual_duration' is not a number: {}", raw)))?;
    if seconds.is_sign_negative() && !seconds.is_zero() {
        return Err(invalid(format!("negative 'actual_duration' {}", seconds)));
    }
    Ok(Some(seconds))
}
