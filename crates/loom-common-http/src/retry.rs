// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Classification of transient failures.

/// Errors that can tell whether repeating the operation may succeed.
pub trait RetryableError {
	fn is_retryable(&self) -> bool;
}

impl RetryableError for reqwest::Error {
	fn is_retryable(&self) -> bool {
		if self.is_timeout() || self.is_connect() || self.is_request() {
			return true;
		}
		self.status().is_some_and(|status| {
			status.is_server_error()
				|| status == reqwest::StatusCode::TOO_MANY_REQUESTS
				|| status == reqwest::StatusCode::REQUEST_TIMEOUT
		})
	}
}
