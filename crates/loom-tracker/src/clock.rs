// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Wall clock abstraction.

use std::sync::atomic::{AtomicI64, Ordering};

/// Source of the current time in epoch seconds.
pub trait Clock: Send + Sync {
	fn epoch_seconds(&self) -> i64;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn epoch_seconds(&self) -> i64 {
		chrono::Utc::now().timestamp()
	}
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
	now: AtomicI64,
}

impl ManualClock {
	pub fn new(now: i64) -> Self {
		Self {
			now: AtomicI64::new(now),
		}
	}

	pub fn set(&self, now: i64) {
		self.now.store(now, Ordering::SeqCst);
	}

	pub fn advance(&self, secs: i64) {
		self.now.fetch_add(secs, Ordering::SeqCst);
	}
}

impl Clock for ManualClock {
	fn epoch_seconds(&self) -> i64 {
		self.now.load(Ordering::SeqCst)
	}
}
