// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Persisted session state.

use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// The persisted record of the current session.
///
/// Timestamps are epoch seconds. A record with `valid == false` is never
/// resumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
	pub start_ts: i64,
	pub last_seen_ts: i64,
	pub company_token: String,
	pub platform: String,
	pub device: String,
	pub cookie: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub registered: Option<String>,
	pub valid: bool,
}

impl SessionRecord {
	/// Returns true if the session was last seen more than `timeout_secs` before `now`.
	pub fn is_expired(&self, now: i64, timeout_secs: i64) -> bool {
		self.last_seen_ts.saturating_add(timeout_secs) < now
	}

	/// Session duration in seconds, extended by `end_offset_secs`.
	pub fn duration(&self, end_offset_secs: i64) -> i64 {
		self.last_seen_ts - self.start_ts + end_offset_secs
	}

	/// The identity this session belongs to.
	pub fn identity(&self) -> Identity {
		Identity {
			cookie: self.cookie.clone(),
			registered: self.registered.clone().filter(|r| !r.is_empty()),
		}
	}
}

/// Why a session ended. Sent as the `reason` property of `session_end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
	NotExpired,
	NotStarted,
	/// No keep-alive within the session timeout.
	Timeout,
	/// A different user identified, or the identity was reset.
	Logout,
}

impl SessionEndReason {
	pub fn as_str(&self) -> &'static str {
		match self {
			SessionEndReason::NotExpired => "not_expired",
			SessionEndReason::NotStarted => "not_started",
			SessionEndReason::Timeout => "timeout",
			SessionEndReason::Logout => "logout",
		}
	}
}

impl std::fmt::Display for SessionEndReason {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}
