// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable, size-bounded queue of command envelopes.
//!
//! The whole queue is persisted as a single JSON array and rewritten on every
//! mutation, so every operation runs under one lock covering both the
//! in-memory sequence and the write to the store.
//!
//! The byte cap is only enforced when it is (re)configured. Enqueues may grow
//! the queue past it; a persist that would exceed the cap is skipped, which
//! leaves the stored queue behind the in-memory one until a later persist
//! fits again.

use std::collections::VecDeque;
use std::sync::Arc;

use loom_tracker_core::Envelope;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::store::KeyValueStore;

/// Default byte cap of the persisted queue (1 MiB).
pub const DEFAULT_CAPACITY_BYTES: usize = 1024 * 1024;

/// Ordered, persisted buffer of envelopes.
///
/// Normal enqueues are FIFO. Envelopes handed back with [`requeue`](Self::requeue)
/// go to the head, ahead of everything already queued.
pub struct PersistentBulkQueue {
	store: Arc<dyn KeyValueStore>,
	key: String,
	state: Mutex<QueueState>,
}

struct QueueState {
	envelopes: VecDeque<Envelope>,
	capacity_bytes: usize,
}

impl PersistentBulkQueue {
	/// Restores the queue stored under `key`.
	///
	/// A missing key yields an empty queue. A corrupt blob is discarded with a
	/// warning. The capacity is applied to the restored queue.
	pub fn load(store: Arc<dyn KeyValueStore>, key: impl Into<String>, capacity_bytes: usize) -> Self {
		let key = key.into();
		let envelopes = match store.get(&key) {
			Ok(Some(raw)) if !raw.is_empty() => match serde_json::from_str::<Vec<Envelope>>(&raw) {
				Ok(envelopes) => envelopes.into(),
				Err(e) => {
					warn!(key = %key, error = %e, "Persisted command queue is corrupt, starting empty");
					VecDeque::new()
				}
			},
			Ok(_) => VecDeque::new(),
			Err(e) => {
				error!(key = %key, error = %e, "Failed to read persisted command queue");
				VecDeque::new()
			}
		};

		debug!(key = %key, count = envelopes.len(), "Loaded command queue");

		let queue = Self {
			store,
			key,
			state: Mutex::new(QueueState {
				envelopes,
				capacity_bytes,
			}),
		};
		queue.set_capacity_bytes(capacity_bytes);
		queue
	}

	/// Appends envelopes at the tail and persists the queue.
	pub fn enqueue(&self, envelopes: impl IntoIterator<Item = Envelope>) {
		let mut state = self.state.lock();
		let before = state.envelopes.len();
		state.envelopes.extend(envelopes);
		if state.envelopes.len() != before {
			self.persist(&state);
		}
	}

	/// Returns up to `limit` envelopes from the head, in order.
	///
	/// With `peek` the queue is left untouched; otherwise the returned
	/// envelopes are removed and the queue is persisted.
	pub fn dequeue_bulk(&self, limit: usize, peek: bool) -> Vec<Envelope> {
		let mut state = self.state.lock();
		let count = limit.min(state.envelopes.len());
		if peek {
			return state.envelopes.iter().take(count).cloned().collect();
		}
		let removed: Vec<Envelope> = state.envelopes.drain(..count).collect();
		if !removed.is_empty() {
			self.persist(&state);
		}
		removed
	}

	/// Inserts envelopes at the head, keeping their relative order.
	pub fn requeue(&self, envelopes: Vec<Envelope>) {
		if envelopes.is_empty() {
			return;
		}
		let mut state = self.state.lock();
		for envelope in envelopes.into_iter().rev() {
			state.envelopes.push_front(envelope);
		}
		self.persist(&state);
	}

	/// Settles a batch previously peeked from the head.
	///
	/// Removes the leading envelopes that still match `batch` and puts back
	/// at the head those whose index is listed in `retry`, under one lock.
	/// Envelopes of the batch trimmed in the meantime stay gone. Returns how
	/// many envelopes were put back.
	pub fn settle(&self, batch: &[Envelope], retry: &[usize]) -> usize {
		let mut state = self.state.lock();
		let present = batch
			.iter()
			.zip(state.envelopes.iter())
			.take_while(|(sent, queued)| sent == queued)
			.count();
		if present < batch.len() {
			debug!(
				sent = batch.len(),
				present,
				"Queue changed while the batch was in flight"
			);
		}
		if present == 0 {
			return 0;
		}

		let removed: Vec<Envelope> = state.envelopes.drain(..present).collect();
		let mut retried = 0;
		for (index, envelope) in removed.into_iter().enumerate().rev() {
			if retry.contains(&index) {
				state.envelopes.push_front(envelope);
				retried += 1;
			}
		}
		self.persist(&state);
		retried
	}

	/// Sets the byte cap and trims envelopes from the tail until the
	/// serialized queue fits.
	pub fn set_capacity_bytes(&self, capacity_bytes: usize) {
		let mut state = self.state.lock();
		state.capacity_bytes = capacity_bytes;

		let sizes: Vec<usize> = state.envelopes.iter().map(encoded_len).collect();
		let mut total = array_len(&sizes);
		let mut trimmed = 0;
		while total > capacity_bytes && !state.envelopes.is_empty() {
			state.envelopes.pop_back();
			trimmed += 1;
			total = array_len(&sizes[..state.envelopes.len()]);
		}

		if trimmed > 0 {
			warn!(
				trimmed,
				remaining = state.envelopes.len(),
				capacity_bytes,
				"Trimmed command queue to fit capacity"
			);
		}
		self.persist(&state);
	}

	pub fn len(&self) -> usize {
		self.state.lock().envelopes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.state.lock().envelopes.is_empty()
	}

	pub fn capacity_bytes(&self) -> usize {
		self.state.lock().capacity_bytes
	}

	/// Returns a copy of all queued envelopes, head first.
	pub fn snapshot(&self) -> Vec<Envelope> {
		self.state.lock().envelopes.iter().cloned().collect()
	}

	fn persist(&self, state: &QueueState) {
		let json = match serde_json::to_string(&state.envelopes) {
			Ok(json) => json,
			Err(e) => {
				error!(error = %e, "Failed to serialize command queue");
				return;
			}
		};

		if json.len() > state.capacity_bytes {
			warn!(
				bytes = json.len(),
				capacity_bytes = state.capacity_bytes,
				count = state.envelopes.len(),
				"Command queue exceeds capacity, skipping persist"
			);
			return;
		}

		if let Err(e) = self.store.set(&self.key, &json) {
			error!(key = %self.key, error = %e, "Failed to persist command queue");
		}
	}
}

fn encoded_len(envelope: &Envelope) -> usize {
	serde_json::to_string(envelope).map_or(0, |json| json.len())
}

/// Length of a JSON array whose elements encode to `sizes` bytes.
fn array_len(sizes: &[usize]) -> usize {
	2 + sizes.iter().sum::<usize>() + sizes.len().saturating_sub(1)
}
