// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background delivery of queued commands.
//!
//! The send loop repeatedly keeps the session alive, peeks a bulk from the
//! head of the queue, posts it, and reconciles the queue with the per-command
//! verdicts:
//!
//! | Outcome | Queue |
//! |---------|-------|
//! | transport error, non-2xx, `success: false`, malformed body | untouched, failure counted |
//! | `"retry"` | requeued at the head |
//! | `"ok"`, `"error"`, anything else, missing result | removed |
//!
//! Between iterations the loop sleeps according to
//! [`RootExponentialBackoff::idle_wait`], and can be woken early by
//! [`BulkSender::flush`] or [`BulkSender::shutdown`].

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use loom_common_http::{RetryableError, RootExponentialBackoff};
use loom_tracker_core::{BulkRequest, BulkResponse, CommandStatus, Envelope, TimeField};
use reqwest::Client;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::TrackerConfig;
use crate::error::{Result, TrackerError};
use crate::queue::PersistentBulkQueue;
use crate::session::SessionManager;

const SDK_NAME: &str = "loom-tracker-rust";
const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Posts a bulk request and returns the raw response body.
#[async_trait]
pub trait BulkTransport: Send + Sync {
	/// Fails on transport errors, timeouts, and non-2xx statuses.
	async fn send_bulk(&self, request: &BulkRequest) -> Result<String>;
}

/// Sends bulks as JSON to `POST {target}/bulk`.
pub struct HttpTransport {
	client: Client,
	url: String,
}

impl HttpTransport {
	pub fn new(target: &str, request_timeout: Duration) -> Result<Self> {
		let target = target.trim().trim_end_matches('/');
		if target.is_empty() {
			return Err(TrackerError::InvalidTarget(
				"target must not be empty".to_string(),
			));
		}
		if !target.starts_with("http://") && !target.starts_with("https://") {
			return Err(TrackerError::InvalidTarget(target.to_string()));
		}

		let client = loom_common_http::sdk_builder(SDK_NAME, SDK_VERSION)
			.timeout(request_timeout)
			.build()
			.map_err(TrackerError::RequestFailed)?;

		Ok(Self {
			client,
			url: format!("{target}/bulk"),
		})
	}

	pub fn url(&self) -> &str {
		&self.url
	}
}

#[async_trait]
impl BulkTransport for HttpTransport {
	async fn send_bulk(&self, request: &BulkRequest) -> Result<String> {
		let response = self
			.client
			.post(&self.url)
			.json(request)
			.send()
			.await
			.map_err(|e| {
				if e.is_timeout() {
					TrackerError::RequestTimeout
				} else {
					TrackerError::RequestFailed(e)
				}
			})?;

		if !response.status().is_success() {
			let status = response.status().as_u16();
			let message = response.text().await.unwrap_or_default();
			return Err(TrackerError::ServerError { status, message });
		}

		Ok(response.text().await?)
	}
}

/// A command the server rejected with `"error"`.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandError {
	/// The envelope as it was stored in the queue.
	pub envelope: Envelope,
	/// The `errors` value of the result entry, if the server sent one.
	pub errors: Option<Value>,
}

/// Receives commands the server rejected.
///
/// Rejected commands are already gone from the queue when the hook runs.
#[async_trait]
pub trait CommandErrorHook: Send + Sync + 'static {
	async fn on_command_error(&self, error: CommandError);
}

pub type SharedCommandErrorHook = Arc<dyn CommandErrorHook>;

/// Discards rejected commands.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpCommandErrorHook;

#[async_trait]
impl CommandErrorHook for NoOpCommandErrorHook {
	async fn on_command_error(&self, _error: CommandError) {}
}

/// What a single send attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
	/// Nothing was queued.
	Idle,
	/// The server answered; `sent` envelopes were resolved or requeued.
	Delivered {
		sent: usize,
		retried: usize,
		rejected: usize,
	},
	/// The bulk was not accepted; the queue is unchanged.
	Failed,
}

/// Send loop tunables.
#[derive(Debug, Clone, Copy)]
pub struct SenderSettings {
	pub bulk_limit: usize,
	pub backoff: RootExponentialBackoff,
	pub time_field: TimeField,
}

impl SenderSettings {
	pub fn from_config(config: &TrackerConfig) -> Self {
		Self {
			bulk_limit: config.bulk_limit.max(1),
			backoff: config.backoff(),
			time_field: config.time_field,
		}
	}
}

impl Default for SenderSettings {
	fn default() -> Self {
		Self::from_config(&TrackerConfig::default())
	}
}

/// Drains the persistent queue to the backend.
pub struct BulkSender {
	queue: Arc<PersistentBulkQueue>,
	session: Arc<SessionManager>,
	transport: Arc<dyn BulkTransport>,
	error_hook: SharedCommandErrorHook,
	clock: Arc<dyn Clock>,
	settings: SenderSettings,
	consecutive_failures: AtomicU32,
	shutdown: AtomicBool,
	wake: Notify,
	shutdown_notify: Notify,
}

impl BulkSender {
	pub fn new(
		queue: Arc<PersistentBulkQueue>,
		session: Arc<SessionManager>,
		transport: Arc<dyn BulkTransport>,
		error_hook: SharedCommandErrorHook,
		clock: Arc<dyn Clock>,
		settings: SenderSettings,
	) -> Self {
		Self {
			queue,
			session,
			transport,
			error_hook,
			clock,
			settings,
			consecutive_failures: AtomicU32::new(0),
			shutdown: AtomicBool::new(false),
			wake: Notify::new(),
			shutdown_notify: Notify::new(),
		}
	}

	/// Sends the head of the queue once and reconciles the queue with the
	/// response.
	///
	/// Cancelling the returned future before the response arrives leaves the
	/// queue untouched.
	pub async fn send_pending(&self) -> SendOutcome {
		let batch = self.queue.dequeue_bulk(self.settings.bulk_limit, true);
		if batch.is_empty() {
			return SendOutcome::Idle;
		}

		let now = self.clock.epoch_seconds() as f64;
		let request = BulkRequest::new(
			batch
				.iter()
				.map(|envelope| envelope.for_wire(self.settings.time_field, now))
				.collect(),
		);

		debug!(count = batch.len(), "Sending bulk");

		let body = match self.transport.send_bulk(&request).await {
			Ok(body) => body,
			Err(e) => {
				let failures = self.record_failure();
				warn!(
					error = %e,
					failures,
					retryable = e.is_retryable(),
					"Bulk request failed"
				);
				return SendOutcome::Failed;
			}
		};

		let response = match BulkResponse::parse(&body) {
			Ok(response) if response.success => response,
			Ok(_) => {
				let failures = self.record_failure();
				warn!(failures, "Bulk rejected by server");
				return SendOutcome::Failed;
			}
			Err(e) => {
				let failures = self.record_failure();
				warn!(error = %e, failures, "Malformed bulk response");
				return SendOutcome::Failed;
			}
		};

		self.consecutive_failures.store(0, Ordering::SeqCst);

		if response.results.len() < batch.len() {
			debug!(
				sent = batch.len(),
				results = response.results.len(),
				"Bulk response is short, treating missing results as delivered"
			);
		} else if response.results.len() > batch.len() {
			debug!(
				sent = batch.len(),
				results = response.results.len(),
				"Ignoring extra bulk results"
			);
		}

		let mut retry = Vec::new();
		let mut rejected = Vec::new();
		for (index, (envelope, result)) in batch.iter().zip(response.results).enumerate() {
			match result.status {
				CommandStatus::Retry => retry.push(index),
				CommandStatus::Error => {
					warn!(
						name = %envelope.name,
						errors = ?result.errors,
						"Command rejected by server"
					);
					rejected.push(CommandError {
						envelope: envelope.clone(),
						errors: result.errors,
					});
				}
				CommandStatus::Ok => {}
				CommandStatus::Other(status) => {
					debug!(name = %envelope.name, status = %status, "Unknown command status, dropping");
				}
			}
		}

		let sent = batch.len();
		let retried = self.queue.settle(&batch, &retry);

		debug!(sent, retried, rejected = rejected.len(), "Bulk delivered");

		let rejected_count = rejected.len();
		for error in rejected {
			self.error_hook.on_command_error(error).await;
		}

		SendOutcome::Delivered {
			sent,
			retried,
			rejected: rejected_count,
		}
	}

	/// Runs one loop iteration and returns how long to wait before the next.
	pub async fn run_once(&self) -> Duration {
		self.session.keep_alive();
		self.send_pending().await;
		self.next_wait()
	}

	/// Wait before the next iteration given the current failure streak.
	pub fn next_wait(&self) -> Duration {
		self
			.settings
			.backoff
			.idle_wait(self.consecutive_failures(), !self.queue.is_empty())
	}

	pub fn consecutive_failures(&self) -> u32 {
		self.consecutive_failures.load(Ordering::SeqCst)
	}

	fn record_failure(&self) -> u32 {
		self
			.consecutive_failures
			.fetch_add(1, Ordering::SeqCst)
			.saturating_add(1)
	}

	/// Wakes the loop so queued commands are sent without waiting.
	pub fn flush(&self) {
		self.wake.notify_one();
	}

	/// Asks the loop to stop. An in-flight request is abandoned.
	pub fn shutdown(&self) {
		self.shutdown.store(true, Ordering::SeqCst);
		self.shutdown_notify.notify_one();
		self.wake.notify_one();
	}

	pub fn is_shutdown(&self) -> bool {
		self.shutdown.load(Ordering::SeqCst)
	}

	/// Runs the send loop until [`shutdown`](Self::shutdown) is called.
	///
	/// Before returning, a loop that is not failing makes one last attempt to
	/// deliver what is queued.
	pub async fn run(&self) {
		info!(
			bulk_limit = self.settings.bulk_limit,
			backoff_base = self.settings.backoff.base,
			max_wait_secs = self.settings.backoff.max_wait.as_secs(),
			"Starting tracker send loop"
		);

		while !self.is_shutdown() {
			let wait = tokio::select! {
				wait = self.run_once() => wait,
				_ = self.shutdown_notify.notified() => break,
			};

			if self.is_shutdown() {
				break;
			}

			debug!(
				wait_ms = wait.as_millis() as u64,
				failures = self.consecutive_failures(),
				pending = self.queue.len(),
				"Waiting before next bulk"
			);

			tokio::select! {
				_ = tokio::time::sleep(wait) => {}
				_ = self.wake.notified() => {}
				_ = self.shutdown_notify.notified() => break,
			}
		}

		if self.consecutive_failures() == 0 && !self.queue.is_empty() {
			let outcome = self.send_pending().await;
			debug!(?outcome, "Final bulk before shutdown");
		}

		info!(pending = self.queue.len(), "Tracker send loop stopped");
	}
}
