// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Session lifecycle and identity reconciliation.
//!
//! A session is started when the tracker initializes without a resumable
//! session, and is replaced whenever it expires or a different user
//! identifies. Every start and end is recorded as a `session_start` /
//! `session_end` track command in the bulk queue.
//!
//! ```text
//! NoSession ──new──▶ Active ──keep_alive──▶ Active
//!                      │
//!                      └──expired / logout──▶ (session_end) ──▶ Active (session_start)
//! ```
//!
//! The manager owns the `session` and `identity` keys of the store.

use std::sync::Arc;

use loom_tracker_core::{
	Command, CommandContext, Identity, PropertyMap, SessionEndReason, SessionRecord,
};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::device::DeviceInfoProvider;
use crate::identity::{CookieGenerator, IdentityStore};
use crate::queue::PersistentBulkQueue;
use crate::store::{KeyValueStore, KEY_SESSION};

pub const EVENT_SESSION_START: &str = "session_start";
pub const EVENT_SESSION_END: &str = "session_end";

pub const PROPERTY_PLATFORM: &str = "platform";
pub const PROPERTY_DEVICE: &str = "device";
pub const PROPERTY_DURATION: &str = "duration";
pub const PROPERTY_REASON: &str = "reason";
pub const PROPERTY_APP_VERSION: &str = "app_version";

/// Session timing settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
	/// Seconds without keep-alive after which a session expires.
	pub timeout_secs: i64,
	/// Seconds added to the measured duration of an ended session.
	pub end_offset_secs: i64,
	/// Application version attached to session events.
	pub app_version: Option<String>,
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			timeout_secs: 20 * 60,
			end_offset_secs: 30,
			app_version: None,
		}
	}
}

/// Observable state of the session manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
	NoSession,
	Active,
}

/// Outcome of [`SessionManager::update_identity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityChange {
	/// The registered id was already the requested one.
	Unchanged,
	/// First identification: the id was attached to the running session.
	Attached,
	/// A different user: the session was ended and a new one started.
	Switched,
}

/// Collaborators the session manager depends on.
pub struct SessionDeps {
	pub store: Arc<dyn KeyValueStore>,
	pub queue: Arc<PersistentBulkQueue>,
	pub clock: Arc<dyn Clock>,
	pub device: Arc<dyn DeviceInfoProvider>,
	pub cookies: Arc<dyn CookieGenerator>,
}

/// Tracks the active session and keeps it in sync with the identity.
pub struct SessionManager {
	deps: SessionDeps,
	config: SessionConfig,
	state: Mutex<SessionState>,
}

struct SessionState {
	company_token: String,
	identity: IdentityStore,
	record: Option<SessionRecord>,
}

impl SessionManager {
	/// Creates a manager with no session. Call [`initialize`](Self::initialize) next.
	pub fn new(deps: SessionDeps, config: SessionConfig) -> Self {
		let identity = IdentityStore::load_or_generate(deps.store.clone(), deps.cookies.as_ref());
		Self {
			deps,
			config,
			state: Mutex::new(SessionState {
				company_token: String::new(),
				identity,
				record: None,
			}),
		}
	}

	/// Loads the persisted session for `company_token` and resumes, restarts,
	/// or creates it.
	///
	/// - No usable record: a new session starts with the persisted identity.
	/// - Expired, or recorded for another company: the old session ends with
	///   [`SessionEndReason::Timeout`] and a new one starts with the old cookie.
	/// - Otherwise the record is resumed without emitting anything.
	pub fn initialize(&self, company_token: &str) {
		let mut state = self.state.lock();
		state.company_token = company_token.to_string();
		let now = self.deps.clock.epoch_seconds();

		match self.load_record() {
			Some(record) if record.valid => {
				let foreign = record.company_token != company_token;
				if foreign || record.is_expired(now, self.config.timeout_secs) {
					info!(
						foreign,
						last_seen = record.last_seen_ts,
						"Persisted session is stale, starting a new one"
					);
					self.end_session_locked(&record, SessionEndReason::Timeout);
					self.new_session_locked(
						&mut state,
						Some(record.cookie.clone()),
						record.registered.clone(),
					);
				} else {
					debug!(start = record.start_ts, "Resuming persisted session");
					state.identity.replace(record.identity());
					state.record = Some(record);
				}
			}
			_ => {
				let identity = state.identity.current().clone();
				self.new_session_locked(&mut state, Some(identity.cookie), identity.registered);
			}
		}

		self.persist_locked(&state);
	}

	/// Refreshes the active session.
	///
	/// An expired session is ended with [`SessionEndReason::Timeout`] and
	/// replaced by one that inherits its cookie and registered id; a live one
	/// just has `last_seen` bumped to now.
	pub fn keep_alive(&self) {
		let mut state = self.state.lock();
		let now = self.deps.clock.epoch_seconds();

		match state.record.clone() {
			Some(record) if record.valid && !record.is_expired(now, self.config.timeout_secs) => {
				if let Some(active) = state.record.as_mut() {
					active.last_seen_ts = now;
				}
			}
			Some(record) if record.valid => {
				info!(last_seen = record.last_seen_ts, now, "Session timed out");
				self.end_session_locked(&record, SessionEndReason::Timeout);
				self.new_session_locked(&mut state, Some(record.cookie), record.registered);
			}
			_ => {
				let identity = state.identity.current().clone();
				self.new_session_locked(&mut state, Some(identity.cookie), identity.registered);
			}
		}

		self.persist_locked(&state);
	}

	/// Reconciles the session with a newly identified registered id.
	///
	/// An empty id is ignored.
	pub fn update_identity(&self, new_registered: &str) -> IdentityChange {
		let mut state = self.state.lock();
		if new_registered.is_empty() {
			return IdentityChange::Unchanged;
		}

		let change = match state.record.clone() {
			Some(record) => match record.identity().registered() {
				Some(current) if current == new_registered => IdentityChange::Unchanged,
				Some(current) => {
					info!(from = current, to = new_registered, "Identity switched, restarting session");
					self.end_session_locked(&record, SessionEndReason::Logout);
					self.new_session_locked(&mut state, None, Some(new_registered.to_string()));
					IdentityChange::Switched
				}
				None => {
					debug!(registered = new_registered, "Attaching registered id to session");
					if let Some(active) = state.record.as_mut() {
						active.registered = Some(new_registered.to_string());
					}
					let identity = Identity::new(record.cookie).with_registered(new_registered);
					state.identity.replace(identity);
					IdentityChange::Attached
				}
			},
			None => {
				let cookie = state.identity.current().cookie.clone();
				self.new_session_locked(&mut state, Some(cookie), Some(new_registered.to_string()));
				IdentityChange::Attached
			}
		};

		self.persist_locked(&state);
		change
	}

	/// Ends the current session and continues as a brand new anonymous actor.
	pub fn reset(&self) {
		let mut state = self.state.lock();
		if let Some(record) = state.record.clone() {
			self.end_session_locked(&record, SessionEndReason::Logout);
		}
		info!("Identity reset, starting anonymous session");
		self.new_session_locked(&mut state, None, None);
		self.persist_locked(&state);
	}

	/// Schedules `session_end` for the current session without replacing it.
	pub fn end_session(&self, reason: SessionEndReason) {
		let state = self.state.lock();
		if let Some(record) = state.record.as_ref() {
			self.end_session_locked(record, reason);
		}
	}

	/// Starts a new session, generating a cookie when none is given.
	pub fn new_session(&self, cookie: Option<String>, registered: Option<String>) {
		let mut state = self.state.lock();
		self.new_session_locked(&mut state, cookie, registered);
		self.persist_locked(&state);
	}

	/// The identity commands are currently attributed to.
	pub fn identity(&self) -> Identity {
		self.state.lock().identity.current().clone()
	}

	/// A copy of the active session record, if any.
	pub fn current(&self) -> Option<SessionRecord> {
		self.state.lock().record.clone()
	}

	/// Platform, device and app version of the active session, falling back
	/// to this host when no session is running.
	pub fn automatic_properties(&self) -> PropertyMap {
		let state = self.state.lock();
		match state.record.as_ref() {
			Some(record) => self.base_properties(&record.platform, &record.device),
			None => {
				let device = self.deps.device.device_info();
				self.base_properties(&device.platform, &device.device)
			}
		}
	}

	pub fn phase(&self) -> SessionPhase {
		match self.state.lock().record.as_ref() {
			Some(record) if record.valid => SessionPhase::Active,
			_ => SessionPhase::NoSession,
		}
	}

	fn end_session_locked(&self, record: &SessionRecord, reason: SessionEndReason) {
		let duration = record.duration(self.config.end_offset_secs);
		let mut properties = self.base_properties(&record.platform, &record.device);
		properties.insert(PROPERTY_DURATION.to_string(), Value::from(duration));
		properties.insert(
			PROPERTY_REASON.to_string(),
			Value::String(reason.as_str().to_string()),
		);

		let command = Command::track(
			CommandContext::new(record.identity(), record.company_token.clone()),
			EVENT_SESSION_END,
			Some(properties),
			record.last_seen_ts as f64,
		);
		self.deps.queue.enqueue([command.to_envelope()]);

		debug!(duration, reason = %reason, cookie = %record.cookie, "Session ended");
	}

	fn new_session_locked(
		&self,
		state: &mut SessionState,
		cookie: Option<String>,
		registered: Option<String>,
	) {
		let now = self.deps.clock.epoch_seconds();
		let cookie = cookie
			.filter(|c| !c.is_empty())
			.unwrap_or_else(|| self.deps.cookies.generate());
		let registered = registered.filter(|r| !r.is_empty());
		let device = self.deps.device.device_info();

		let record = SessionRecord {
			start_ts: now,
			last_seen_ts: now,
			company_token: state.company_token.clone(),
			platform: device.platform,
			device: device.device,
			cookie,
			registered,
			valid: true,
		};

		state.identity.replace(record.identity());

		let properties = self.base_properties(&record.platform, &record.device);
		let command = Command::track(
			CommandContext::new(record.identity(), record.company_token.clone()),
			EVENT_SESSION_START,
			Some(properties),
			now as f64,
		);
		self.deps.queue.enqueue([command.to_envelope()]);

		debug!(cookie = %record.cookie, start = now, "Session started");
		state.record = Some(record);
	}

	fn base_properties(&self, platform: &str, device: &str) -> PropertyMap {
		let mut properties = PropertyMap::new();
		properties.insert(
			PROPERTY_PLATFORM.to_string(),
			Value::String(platform.to_string()),
		);
		properties.insert(PROPERTY_DEVICE.to_string(), Value::String(device.to_string()));
		if let Some(version) = &self.config.app_version {
			properties.insert(
				PROPERTY_APP_VERSION.to_string(),
				Value::String(version.clone()),
			);
		}
		properties
	}

	fn load_record(&self) -> Option<SessionRecord> {
		let raw = match self.deps.store.get(KEY_SESSION) {
			Ok(raw) => raw?,
			Err(e) => {
				error!(error = %e, "Failed to read persisted session");
				return None;
			}
		};
		match serde_json::from_str(&raw) {
			Ok(record) => Some(record),
			Err(e) => {
				warn!(error = %e, "Persisted session is corrupt, discarding");
				None
			}
		}
	}

	fn persist_locked(&self, state: &SessionState) {
		let Some(record) = state.record.as_ref() else {
			return;
		};
		let json = match serde_json::to_string(record) {
			Ok(json) => json,
			Err(e) => {
				error!(error = %e, "Failed to serialize session");
				return;
			}
		};
		if let Err(e) = self.deps.store.set(KEY_SESSION, &json) {
			error!(error = %e, "Failed to persist session");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::clock::ManualClock;
	use crate::device::DeviceInfo;
	use crate::queue::DEFAULT_CAPACITY_BYTES;
	use crate::store::{MemoryStore, KEY_COMMAND_QUEUE, KEY_IDENTITY};
	use loom_tracker_core::Envelope;
	use std::sync::atomic::{AtomicUsize, Ordering};

	const T0: i64 = 1_700_000_000;

	struct SequentialCookies(AtomicUsize);

	impl CookieGenerator for SequentialCookies {
		fn generate(&self) -> String {
			format!("cookie-{}", self.0.fetch_add(1, Ordering::SeqCst))
		}
	}

	struct Harness {
		store: Arc<MemoryStore>,
		queue: Arc<PersistentBulkQueue>,
		clock: Arc<ManualClock>,
	}

	impl Harness {
		fn new() -> Self {
			let store = Arc::new(MemoryStore::new());
			let queue = Arc::new(PersistentBulkQueue::load(
				store.clone(),
				KEY_COMMAND_QUEUE,
				DEFAULT_CAPACITY_BYTES,
			));
			Self {
				store,
				queue,
				clock: Arc::new(ManualClock::new(T0)),
			}
		}

		fn manager(&self) -> SessionManager {
			SessionManager::new(
				SessionDeps {
					store: self.store.clone(),
					queue: self.queue.clone(),
					clock: self.clock.clone(),
					device: Arc::new(DeviceInfo::new("Linux", "x86_64")),
					cookies: Arc::new(SequentialCookies(AtomicUsize::new(0))),
				},
				SessionConfig::default(),
			)
		}

		fn drain(&self) -> Vec<Envelope> {
			self.queue.dequeue_bulk(usize::MAX, false)
		}

		fn persist_record(&self, record: &SessionRecord) {
			self
				.store
				.set(KEY_SESSION, &serde_json::to_string(record).unwrap())
				.unwrap();
		}
	}

	fn record(start_ts: i64, last_seen_ts: i64) -> SessionRecord {
		SessionRecord {
			start_ts,
			last_seen_ts,
			company_token: "token".to_string(),
			platform: "Linux".to_string(),
			device: "x86_64".to_string(),
			cookie: "persisted".to_string(),
			registered: None,
			valid: true,
		}
	}

	fn event_type(envelope: &Envelope) -> &str {
		envelope.data["type"].as_str().unwrap()
	}

	#[test]
	fn initialize_without_session_starts_one() {
		let h = Harness::new();
		let manager = h.manager();
		assert_eq!(manager.phase(), SessionPhase::NoSession);

		manager.initialize("token");

		let session = manager.current().unwrap();
		assert_eq!(manager.phase(), SessionPhase::Active);
		assert_eq!(session.start_ts, T0);
		assert_eq!(session.last_seen_ts, T0);
		assert_eq!(session.cookie, "cookie-0");

		let sent = h.drain();
		assert_eq!(sent.len(), 1);
		assert_eq!(event_type(&sent[0]), EVENT_SESSION_START);
		assert_eq!(sent[0].data["properties"]["platform"], "Linux");
		assert_eq!(sent[0].data["properties"]["device"], "x86_64");
		assert!(h.store.get(KEY_SESSION).unwrap().is_some());
	}

	#[test]
	fn initialize_resumes_live_session_silently() {
		let h = Harness::new();
		h.persist_record(&record(T0 - 100, T0 - 10));

		let manager = h.manager();
		manager.initialize("token");

		assert!(h.drain().is_empty());
		assert_eq!(manager.current().unwrap().start_ts, T0 - 100);
		assert_eq!(manager.identity(), Identity::new("persisted"));
	}

	#[test]
	fn initialize_invalid_session_starts_fresh() {
		let h = Harness::new();
		let mut stale = record(T0 - 100, T0 - 10);
		stale.valid = false;
		h.persist_record(&stale);

		let manager = h.manager();
		manager.initialize("token");

		let sent = h.drain();
		assert_eq!(sent.len(), 1);
		assert_eq!(event_type(&sent[0]), EVENT_SESSION_START);
		assert_eq!(manager.current().unwrap().start_ts, T0);
	}

	#[test]
	fn initialize_expired_session_ends_and_restarts_with_same_cookie() {
		let h = Harness::new();
		h.persist_record(&record(T0 - 5000, T0 - 2000));

		let manager = h.manager();
		manager.initialize("token");

		let sent = h.drain();
		assert_eq!(sent.len(), 2);
		assert_eq!(event_type(&sent[0]), EVENT_SESSION_END);
		assert_eq!(sent[0].data["properties"]["reason"], "timeout");
		assert_eq!(sent[0].data["properties"]["duration"], 3000 + 30);
		assert_eq!(event_type(&sent[1]), EVENT_SESSION_START);

		let session = manager.current().unwrap();
		assert_eq!(session.cookie, "persisted");
		assert_eq!(session.start_ts, T0);
	}

	#[test]
	fn initialize_with_other_company_restarts() {
		let h = Harness::new();
		h.persist_record(&record(T0 - 100, T0 - 10));

		let manager = h.manager();
		manager.initialize("other-token");

		let sent = h.drain();
		assert_eq!(event_type(&sent[0]), EVENT_SESSION_END);
		assert_eq!(sent[0].data["company_id"], "token");
		assert_eq!(sent[1].data["company_id"], "other-token");
		assert_eq!(manager.current().unwrap().cookie, "persisted");
	}

	#[test]
	fn keep_alive_bumps_last_seen() {
		let h = Harness::new();
		let manager = h.manager();
		manager.initialize("token");
		h.drain();

		h.clock.advance(600);
		manager.keep_alive();

		let session = manager.current().unwrap();
		assert_eq!(session.start_ts, T0);
		assert_eq!(session.last_seen_ts, T0 + 600);
		assert!(h.drain().is_empty());

		let persisted: SessionRecord =
			serde_json::from_str(&h.store.get(KEY_SESSION).unwrap().unwrap()).unwrap();
		assert_eq!(persisted.last_seen_ts, T0 + 600);
	}

	#[test]
	fn keep_alive_after_timeout_rotates_session() {
		let h = Harness::new();
		h.persist_record(&record(T0 - 1300, T0));
		let manager = h.manager();
		manager.initialize("token");
		manager.update_identity("alice");
		h.drain();

		h.clock.set(T0 + 1300);
		manager.keep_alive();

		let sent = h.drain();
		assert_eq!(sent.len(), 2);
		assert_eq!(event_type(&sent[0]), EVENT_SESSION_END);
		assert_eq!(sent[0].data["properties"]["reason"], "timeout");
		assert_eq!(sent[0].data["properties"]["duration"], 1300 + 30);
		assert_eq!(event_type(&sent[1]), EVENT_SESSION_START);

		let session = manager.current().unwrap();
		assert_eq!(session.cookie, "persisted");
		assert_eq!(session.registered.as_deref(), Some("alice"));
		assert_eq!(session.start_ts, T0 + 1300);
		assert_eq!(session.last_seen_ts, T0 + 1300);
	}

	#[test]
	fn first_identification_attaches_without_new_session() {
		let h = Harness::new();
		let manager = h.manager();
		manager.initialize("token");
		h.drain();
		let cookie = manager.identity().cookie;

		let change = manager.update_identity("alice");

		assert_eq!(change, IdentityChange::Attached);
		assert!(h.drain().is_empty());
		assert_eq!(manager.identity(), Identity::new(cookie).with_registered("alice"));
		assert_eq!(manager.current().unwrap().start_ts, T0);
	}

	#[test]
	fn same_identification_is_unchanged() {
		let h = Harness::new();
		let manager = h.manager();
		manager.initialize("token");
		manager.update_identity("alice");
		h.drain();
		let before = manager.identity();

		assert_eq!(manager.update_identity("alice"), IdentityChange::Unchanged);
		assert_eq!(manager.identity(), before);
		assert!(h.drain().is_empty());
	}

	#[test]
	fn different_identification_logs_out() {
		let h = Harness::new();
		let manager = h.manager();
		manager.initialize("token");
		manager.update_identity("alice");
		h.drain();
		let old_cookie = manager.identity().cookie;

		let change = manager.update_identity("bob");

		assert_eq!(change, IdentityChange::Switched);
		let sent = h.drain();
		assert_eq!(sent.len(), 2);
		assert_eq!(event_type(&sent[0]), EVENT_SESSION_END);
		assert_eq!(sent[0].data["properties"]["reason"], "logout");
		assert_eq!(sent[0].data["customer_ids"]["registered"], "alice");
		assert_eq!(event_type(&sent[1]), EVENT_SESSION_START);
		assert_eq!(sent[1].data["customer_ids"]["registered"], "bob");

		let identity = manager.identity();
		assert_ne!(identity.cookie, old_cookie);
		assert_eq!(identity.registered(), Some("bob"));

		let stored: Identity =
			serde_json::from_str(&h.store.get(KEY_IDENTITY).unwrap().unwrap()).unwrap();
		assert_eq!(stored, identity);
	}

	#[test]
	fn empty_identification_is_ignored() {
		let h = Harness::new();
		let manager = h.manager();
		manager.initialize("token");

		assert_eq!(manager.update_identity(""), IdentityChange::Unchanged);
		assert!(!manager.identity().is_registered());
	}

	#[test]
	fn reset_starts_anonymous_session_with_fresh_cookie() {
		let h = Harness::new();
		let manager = h.manager();
		manager.initialize("token");
		manager.update_identity("alice");
		h.drain();
		let old_cookie = manager.identity().cookie;

		manager.reset();

		let sent = h.drain();
		assert_eq!(event_type(&sent[0]), EVENT_SESSION_END);
		assert_eq!(sent[0].data["properties"]["reason"], "logout");
		assert_eq!(event_type(&sent[1]), EVENT_SESSION_START);
		let identity = manager.identity();
		assert_ne!(identity.cookie, old_cookie);
		assert!(!identity.is_registered());
	}

	#[test]
	fn end_session_keeps_record() {
		let h = Harness::new();
		let manager = h.manager();
		manager.initialize("token");
		h.drain();

		manager.end_session(SessionEndReason::NotExpired);

		let sent = h.drain();
		assert_eq!(sent.len(), 1);
		assert_eq!(sent[0].data["properties"]["reason"], "not_expired");
		assert_eq!(sent[0].data["properties"]["duration"], 30);
		assert_eq!(manager.phase(), SessionPhase::Active);
	}

	#[test]
	fn new_session_generates_cookie_when_missing() {
		let h = Harness::new();
		let manager = h.manager();
		manager.initialize("token");

		manager.new_session(None, Some("carol".to_string()));

		let session = manager.current().unwrap();
		assert_eq!(session.cookie, "cookie-1");
		assert_eq!(session.registered.as_deref(), Some("carol"));
	}

	#[test]
	fn app_version_is_attached_to_session_events() {
		let h = Harness::new();
		let manager = SessionManager::new(
			SessionDeps {
				store: h.store.clone(),
				queue: h.queue.clone(),
				clock: h.clock.clone(),
				device: Arc::new(DeviceInfo::new("iOS", "iPhone")),
				cookies: Arc::new(SequentialCookies(AtomicUsize::new(0))),
			},
			SessionConfig {
				app_version: Some("2.0.3".to_string()),
				..SessionConfig::default()
			},
		);
		manager.initialize("token");

		let sent = h.drain();
		assert_eq!(sent[0].data["properties"]["app_version"], "2.0.3");
		assert_eq!(
			Value::Object(manager.automatic_properties()),
			sent[0].data["properties"]
		);
	}

	#[test]
	fn automatic_properties_fall_back_to_host_device() {
		let h = Harness::new();
		let manager = h.manager();

		let properties = manager.automatic_properties();

		assert_eq!(properties[PROPERTY_PLATFORM], "Linux");
		assert_eq!(properties[PROPERTY_DEVICE], "x86_64");
		assert!(!properties.contains_key(PROPERTY_APP_VERSION));
	}

	#[test]
	fn session_survives_restart() {
		let h = Harness::new();
		{
			let manager = h.manager();
			manager.initialize("token");
			manager.update_identity("alice");
		}
		h.drain();

		h.clock.advance(60);
		let manager = h.manager();
		manager.initialize("token");

		assert!(h.drain().is_empty());
		assert_eq!(manager.identity().registered(), Some("alice"));
		assert_eq!(manager.identity().cookie, "cookie-0");
	}
}
