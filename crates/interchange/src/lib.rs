//! ce-interchange: the JSON contract between field devices and the server.
//!
//! Devices send a [`MergeRequest`] (a batch of step changes plus the device
//! vector clock). The server answers with a [`MergeResponse`] whose status is
//! `merged`, `queued` or `sync_failed`.
//!
//! Ingress runs in two stages: [`parse_request`] checks shape,
//! [`MergeRequest::validate`] checks clocks, timestamps and change payloads.
//! A [`ValidatedRequest`] is then folded into an incoming
//! [`ce_core::CrdtDocument`] with [`ValidatedRequest::to_document`].

pub mod deserialize;
pub mod ingest;
pub mod types;

pub use deserialize::{parse_request, parse_timestamp, InterchangeError};
pub use types::*;
