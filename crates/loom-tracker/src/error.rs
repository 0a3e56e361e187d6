// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the tracker SDK.

use std::path::PathBuf;

use loom_common_http::RetryableError;
use loom_tracker_core::CoreError;
use thiserror::Error;

/// Tracker SDK errors.
#[derive(Debug, Error)]
pub enum TrackerError {
	/// Company token is missing or empty.
	#[error("invalid company token: must not be empty")]
	InvalidCompanyToken,

	/// Target URL is missing or invalid.
	#[error("invalid target URL: {0}")]
	InvalidTarget(String),

	/// HTTP request failed.
	#[error("HTTP request failed: {0}")]
	RequestFailed(#[from] reqwest::Error),

	/// Server returned a non-success HTTP status.
	#[error("server error ({status}): {message}")]
	ServerError { status: u16, message: String },

	/// The bulk request did not complete within the request timeout.
	#[error("bulk request timed out")]
	RequestTimeout,

	/// The server answered with a body that is not a valid bulk response.
	#[error("invalid bulk response: {0}")]
	InvalidResponse(#[from] CoreError),

	/// Persisted store failure.
	#[error("store error: {0}")]
	Store(#[from] StoreError),

	/// Configuration failure.
	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),

	/// Serialization error.
	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	/// Client has been shut down.
	#[error("client has been shut down")]
	ClientShutdown,
}

impl RetryableError for TrackerError {
	fn is_retryable(&self) -> bool {
		match self {
			TrackerError::RequestFailed(e) => e.is_retryable(),
			TrackerError::ServerError { status, .. } => {
				matches!(*status, 429 | 408 | 500 | 502 | 503 | 504)
			}
			TrackerError::RequestTimeout => true,
			TrackerError::InvalidResponse(_) => true,
			_ => false,
		}
	}
}

/// Errors raised by a [`KeyValueStore`](crate::store::KeyValueStore).
#[derive(Debug, Error)]
pub enum StoreError {
	/// Key contains characters the store cannot represent.
	#[error("invalid store key: {0:?}")]
	InvalidKey(String),

	/// Filesystem failure while reading or writing a key.
	#[error("I/O error on {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
}

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// I/O error reading a config file.
	#[error("I/O error reading {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	/// TOML parsing error.
	#[error("TOML parse error: {0}")]
	TomlParse(#[from] toml::de::Error),

	/// Environment variable has an unusable value.
	#[error("invalid value for {name}: {value:?}")]
	Env { name: String, value: String },

	/// Validation error.
	#[error("validation error: {0}")]
	Validation(String),
}

/// Result type alias for tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;
