// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tracker configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `LOOM_TRACKER_*` environment variables.
//!
//! ```toml
//! target = "https://api.infinario.com"
//! bulk_limit = 49
//! backoff_base = 3.0
//! session_timeout_secs = 1200
//! time_field = "timestamp"
//! ```

use std::path::Path;
use std::time::Duration;

use loom_common_http::RootExponentialBackoff;
use loom_tracker_core::TimeField;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::queue::DEFAULT_CAPACITY_BYTES;
use crate::session::SessionConfig;

/// Default tracking backend.
pub const DEFAULT_TARGET: &str = "https://api.infinario.com";

const ENV_PREFIX: &str = "LOOM_TRACKER_";

/// Tunables for the send loop, the session manager, and the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
	/// Base URL of the tracking backend; bulks go to `{target}/bulk`.
	pub target: String,
	/// Maximum number of envelopes per bulk request.
	pub bulk_limit: usize,
	/// Base of the `base^sqrt(failures + 1)` backoff.
	pub backoff_base: f64,
	pub session_timeout_secs: u64,
	/// Seconds added to the duration reported in `session_end`.
	pub session_end_offset_secs: u64,
	/// The send loop waits at most `session_timeout_secs - max_wait_margin_secs`.
	pub max_wait_margin_secs: u64,
	pub request_timeout_secs: u64,
	pub queue_capacity_bytes: usize,
	pub time_field: TimeField,
	/// Attached to session events when set.
	pub app_version: Option<String>,
}

impl Default for TrackerConfig {
	fn default() -> Self {
		Self {
			target: DEFAULT_TARGET.to_string(),
			bulk_limit: 49,
			backoff_base: 3.0,
			session_timeout_secs: 20 * 60,
			session_end_offset_secs: 30,
			max_wait_margin_secs: 3,
			request_timeout_secs: 10,
			queue_capacity_bytes: DEFAULT_CAPACITY_BYTES,
			time_field: TimeField::Timestamp,
			app_version: None,
		}
	}
}

impl TrackerConfig {
	/// Parses a TOML document. Missing keys keep their defaults.
	pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
		Ok(toml::from_str(s)?)
	}

	/// Reads and parses a TOML file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
			path: path.to_path_buf(),
			source,
		})?;
		Self::from_toml_str(&contents)
	}

	/// Applies `LOOM_TRACKER_*` overrides from the process environment.
	pub fn apply_env(self) -> Result<Self, ConfigError> {
		self.apply_env_from(|name| std::env::var(name).ok())
	}

	/// Applies `LOOM_TRACKER_*` overrides read through `lookup`.
	pub fn apply_env_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let var = |suffix: &str| {
			let name = format!("{ENV_PREFIX}{suffix}");
			lookup(&name).map(|value| (name, value))
		};

		if let Some((_, value)) = var("TARGET") {
			self.target = value;
		}
		if let Some((name, value)) = var("BULK_LIMIT") {
			self.bulk_limit = parse(&name, &value)?;
		}
		if let Some((name, value)) = var("BACKOFF_BASE") {
			self.backoff_base = parse(&name, &value)?;
		}
		if let Some((name, value)) = var("SESSION_TIMEOUT_SECS") {
			self.session_timeout_secs = parse(&name, &value)?;
		}
		if let Some((name, value)) = var("SESSION_END_OFFSET_SECS") {
			self.session_end_offset_secs = parse(&name, &value)?;
		}
		if let Some((name, value)) = var("MAX_WAIT_MARGIN_SECS") {
			self.max_wait_margin_secs = parse(&name, &value)?;
		}
		if let Some((name, value)) = var("REQUEST_TIMEOUT_SECS") {
			self.request_timeout_secs = parse(&name, &value)?;
		}
		if let Some((name, value)) = var("QUEUE_CAPACITY_BYTES") {
			self.queue_capacity_bytes = parse(&name, &value)?;
		}
		if let Some((name, value)) = var("TIME_FIELD") {
			self.time_field = match value.to_ascii_lowercase().as_str() {
				"timestamp" => TimeField::Timestamp,
				"age" => TimeField::Age,
				_ => return Err(ConfigError::Env { name, value }),
			};
		}
		if let Some((_, value)) = var("APP_VERSION") {
			self.app_version = Some(value).filter(|v| !v.is_empty());
		}

		Ok(self)
	}

	/// Rejects settings the send loop cannot work with.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.target.trim().is_empty() {
			return Err(ConfigError::Validation("target must not be empty".into()));
		}
		if self.bulk_limit == 0 {
			return Err(ConfigError::Validation("bulk_limit must be at least 1".into()));
		}
		if self.backoff_base.is_nan() || self.backoff_base < 1.0 {
			return Err(ConfigError::Validation(format!(
				"backoff_base must be at least 1, got {}",
				self.backoff_base
			)));
		}
		if self.session_timeout_secs <= self.max_wait_margin_secs {
			return Err(ConfigError::Validation(format!(
				"session_timeout_secs ({}) must exceed max_wait_margin_secs ({})",
				self.session_timeout_secs, self.max_wait_margin_secs
			)));
		}
		if self.request_timeout_secs == 0 {
			return Err(ConfigError::Validation(
				"request_timeout_secs must be at least 1".into(),
			));
		}
		Ok(())
	}

	/// Longest the send loop may sleep between iterations.
	pub fn max_wait(&self) -> Duration {
		Duration::from_secs(
			self
				.session_timeout_secs
				.saturating_sub(self.max_wait_margin_secs),
		)
	}

	pub fn backoff(&self) -> RootExponentialBackoff {
		RootExponentialBackoff::new(self.backoff_base, self.max_wait())
	}

	pub fn request_timeout(&self) -> Duration {
		Duration::from_secs(self.request_timeout_secs)
	}

	pub fn session_config(&self) -> SessionConfig {
		SessionConfig {
			timeout_secs: i64::try_from(self.session_timeout_secs).unwrap_or(i64::MAX),
			end_offset_secs: i64::try_from(self.session_end_offset_secs).unwrap_or(i64::MAX),
			app_version: self.app_version.clone(),
		}
	}
}

fn parse<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
	value.trim().parse().map_err(|_| ConfigError::Env {
		name: name.to_string(),
		value: value.to_string(),
	})
}
