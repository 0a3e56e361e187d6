// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Envelopes and the `/bulk` wire protocol.
//!
//! Request:
//!
//! ```json
//! {"commands": [{"name": "crm/events", "data": {...}}, ...]}
//! ```
//!
//! Response, with `results` positionally aligned to `commands`:
//!
//! ```json
//! {"success": true, "results": [{"status": "ok"}, {"status": "retry"}, {"status": "error", "errors": [...]}]}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::{TimeField, FIELD_AGE, FIELD_TIMESTAMP};
use crate::error::{CoreError, Result};

/// A serialized command: the unit stored in the queue and sent in bulk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
	pub name: String,
	pub data: Value,
}

impl Envelope {
	pub fn new(name: impl Into<String>, data: Value) -> Self {
		Self {
			name: name.into(),
			data,
		}
	}

	/// Returns the envelope as it should be sent at `now` (epoch seconds).
	///
	/// With [`TimeField::Age`], a stored `timestamp` is replaced by the number
	/// of seconds elapsed since it. Envelopes without a timestamp are returned
	/// unchanged.
	pub fn for_wire(&self, time_field: TimeField, now: f64) -> Envelope {
		let mut envelope = self.clone();
		if time_field == TimeField::Age {
			if let Some(data) = envelope.data.as_object_mut() {
				if let Some(timestamp) = data.remove(FIELD_TIMESTAMP) {
					let age = timestamp.as_f64().map_or(0.0, |ts| (now - ts).max(0.0));
					data.insert(FIELD_AGE.to_string(), Value::from(age));
				}
			}
		}
		envelope
	}
}

/// Body of a `POST {target}/bulk` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkRequest {
	pub commands: Vec<Envelope>,
}

impl BulkRequest {
	pub fn new(commands: Vec<Envelope>) -> Self {
		Self { commands }
	}
}

/// Server verdict for a single command of a bulk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
	/// Accepted.
	Ok,
	/// Must be resent.
	Retry,
	/// Rejected; will not be resent.
	Error,
	/// Any other status string. Treated as resolved.
	Other(String),
}

impl CommandStatus {
	/// Parses a status string, ignoring case.
	pub fn parse(status: &str) -> Self {
		match status.to_ascii_lowercase().as_str() {
			"ok" => CommandStatus::Ok,
			"retry" => CommandStatus::Retry,
			"error" => CommandStatus::Error,
			other => CommandStatus::Other(other.to_string()),
		}
	}

	pub fn is_retry(&self) -> bool {
		matches!(self, CommandStatus::Retry)
	}
}

/// Result entry for one submitted command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
	pub status: CommandStatus,
	pub errors: Option<Value>,
}

/// Parsed body of a bulk response.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkResponse {
	pub success: bool,
	pub results: Vec<CommandResult>,
}

impl BulkResponse {
	/// Parses a bulk response body.
	///
	/// The body must be a JSON object with a boolean `success`. When `success`
	/// is true, `results` must be an array of objects each carrying a string
	/// `status`. Anything else is reported as [`CoreError::MalformedResponse`].
	pub fn parse(body: &str) -> Result<Self> {
		let value: Value = serde_json::from_str(body)?;
		let object = value
			.as_object()
			.ok_or_else(|| CoreError::MalformedResponse("response is not an object".to_string()))?;

		let success = object
			.get("success")
			.and_then(Value::as_bool)
			.ok_or_else(|| CoreError::MalformedResponse("missing boolean `success`".to_string()))?;

		if !success {
			return Ok(Self {
				success,
				results: Vec::new(),
			});
		}

		let entries = object
			.get("results")
			.and_then(Value::as_array)
			.ok_or_else(|| CoreError::MalformedResponse("missing array `results`".to_string()))?;

		let results = entries
			.iter()
			.enumerate()
			.map(|(idx, entry)| {
				let status = entry.get("status").and_then(Value::as_str).ok_or_else(|| {
					CoreError::MalformedResponse(format!("result {idx} has no string `status`"))
				})?;
				Ok(CommandResult {
					status: CommandStatus::parse(status),
					errors: entry.get("errors").cloned(),
				})
			})
			.collect::<Result<Vec<_>>>()?;

		Ok(Self { success, results })
	}
}
