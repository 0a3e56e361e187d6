// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The identity of the actor that commands are attributed to.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key under which the anonymous cookie is sent.
pub const ID_COOKIE: &str = "cookie";
/// Key under which the registered id is sent.
pub const ID_REGISTERED: &str = "registered";

/// An anonymous cookie paired with an optional application-supplied id.
///
/// The cookie is generated once and kept across restarts. The registered id
/// is attached by identify calls. An empty registered id is the same as no
/// registered id at all, both for equality and on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
	pub cookie: String,
	#[serde(default, skip_serializing_if = "is_blank")]
	pub registered: Option<String>,
}

fn is_blank(registered: &Option<String>) -> bool {
	registered.as_deref().map_or(true, str::is_empty)
}

impl Identity {
	/// Creates an anonymous identity with the given cookie.
	pub fn new(cookie: impl Into<String>) -> Self {
		Self {
			cookie: cookie.into(),
			registered: None,
		}
	}

	/// Sets the registered id (builder pattern).
	pub fn with_registered(mut self, registered: impl Into<String>) -> Self {
		self.registered = Some(registered.into());
		self
	}

	/// Returns the registered id, treating an empty string as absent.
	pub fn registered(&self) -> Option<&str> {
		self.registered.as_deref().filter(|r| !r.is_empty())
	}

	/// Returns true if a non-empty registered id is attached.
	pub fn is_registered(&self) -> bool {
		self.registered().is_some()
	}

	/// Converts the identity to the id map used in command payloads.
	///
	/// Always contains `cookie`; contains `registered` only when it is set and
	/// non-empty.
	pub fn to_ids_map(&self) -> Map<String, Value> {
		let mut ids = Map::new();
		ids.insert(ID_COOKIE.to_string(), Value::String(self.cookie.clone()));
		if let Some(registered) = self.registered() {
			ids.insert(
				ID_REGISTERED.to_string(),
				Value::String(registered.to_string()),
			);
		}
		ids
	}
}

impl PartialEq for Identity {
	fn eq(&self, other: &Self) -> bool {
		self.cookie == other.cookie && self.registered() == other.registered()
	}
}

impl Eq for Identity {}

impl std::fmt::Display for Identity {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"<cookie:'{}',registered:'{}'>",
			self.cookie,
			self.registered().unwrap_or_default()
		)
	}
}
