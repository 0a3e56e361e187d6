// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the tracker core.

use thiserror::Error;

/// Errors produced while decoding tracker wire data.
#[derive(Debug, Error)]
pub enum CoreError {
	/// The bulk response did not match the expected shape.
	#[error("malformed bulk response: {0}")]
	MalformedResponse(String),

	/// JSON encoding or decoding failed.
	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

/// Result type alias for tracker core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
