// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Idle-wait policy for long-running send loops.
//!
//! The wait after `n` consecutive failures is `base^sqrt(n + 1)` seconds,
//! which grows quickly for the first few failures and flattens afterwards.
//! With the default base of 3:
//!
//! | failures | wait |
//! |----------|------|
//! | 0 | 3.00s |
//! | 1 | 4.73s |
//! | 3 | 9.00s |
//! | 8 | 27.0s |

use std::time::Duration;

/// Root-exponential backoff clamped to `[0, max_wait]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RootExponentialBackoff {
	/// Base of the exponent. Values below 1 are treated as 1.
	pub base: f64,
	/// Upper bound on any computed wait.
	pub max_wait: Duration,
}

impl Default for RootExponentialBackoff {
	fn default() -> Self {
		Self {
			base: 3.0,
			max_wait: Duration::from_secs(20 * 60 - 3),
		}
	}
}

impl RootExponentialBackoff {
	pub fn new(base: f64, max_wait: Duration) -> Self {
		Self { base, max_wait }
	}

	/// Wait before the next attempt after `consecutive_failures` failures.
	pub fn delay(&self, consecutive_failures: u32) -> Duration {
		let exponent = (f64::from(consecutive_failures) + 1.0).sqrt();
		let secs = self.base.max(1.0).powf(exponent);
		if !secs.is_finite() || secs >= self.max_wait.as_secs_f64() {
			return self.max_wait;
		}
		Duration::from_secs_f64(secs.max(0.0))
	}

	/// Wait for a send loop that just finished an iteration.
	///
	/// A loop that is not failing and still has pending work continues
	/// immediately; otherwise it waits according to [`Self::delay`].
	pub fn idle_wait(&self, consecutive_failures: u32, has_pending: bool) -> Duration {
		if consecutive_failures == 0 && has_pending {
			return Duration::ZERO;
		}
		self.delay(consecutive_failures)
	}
}
