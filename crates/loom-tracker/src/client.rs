// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The tracker client and its builder.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use loom_tracker_core::{Command, CommandContext, Identity, PropertyMap, ID_REGISTERED};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::TrackerConfig;
use crate::device::{DeviceInfoProvider, HostDeviceInfo};
use crate::error::{Result, TrackerError};
use crate::identity::{CookieGenerator, UuidCookieGenerator};
use crate::properties::Properties;
use crate::queue::PersistentBulkQueue;
use crate::sender::{
	BulkSender, BulkTransport, CommandErrorHook, HttpTransport, NoOpCommandErrorHook,
	SenderSettings, SharedCommandErrorHook,
};
use crate::session::{IdentityChange, SessionDeps, SessionManager, PROPERTY_DEVICE, PROPERTY_PLATFORM};
use crate::store::{FileStore, KeyValueStore, MemoryStore, KEY_COMMAND_QUEUE};

pub const EVENT_VIRTUAL_PAYMENT: &str = "virtual_payment";
pub const EVENT_IDENTIFICATION: &str = "identification";

/// Builder for constructing a [`TrackerClient`].
pub struct TrackerClientBuilder {
	company_token: Option<String>,
	target: Option<String>,
	store: Option<Arc<dyn KeyValueStore>>,
	clock: Option<Arc<dyn Clock>>,
	device: Option<Arc<dyn DeviceInfoProvider>>,
	cookie_generator: Option<Arc<dyn CookieGenerator>>,
	transport: Option<Arc<dyn BulkTransport>>,
	error_hook: Option<SharedCommandErrorHook>,
	config: TrackerConfig,
}

impl TrackerClientBuilder {
	pub fn new() -> Self {
		Self {
			company_token: None,
			target: None,
			store: None,
			clock: None,
			device: None,
			cookie_generator: None,
			transport: None,
			error_hook: None,
			config: TrackerConfig::default(),
		}
	}

	/// Sets the company token every command is attributed to. Required.
	pub fn company_token(mut self, token: impl Into<String>) -> Self {
		self.company_token = Some(token.into());
		self
	}

	/// Overrides the backend URL from the config.
	///
	/// Example: `https://api.infinario.com`
	pub fn target(mut self, target: impl Into<String>) -> Self {
		self.target = Some(target.into());
		self
	}

	/// Sets where the queue, session and identity are persisted.
	///
	/// Defaults to a [`FileStore`] under [`FileStore::default_dir`].
	pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
		self.store = Some(store);
		self
	}

	pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = Some(clock);
		self
	}

	pub fn device(mut self, device: Arc<dyn DeviceInfoProvider>) -> Self {
		self.device = Some(device);
		self
	}

	pub fn cookie_generator(mut self, cookies: Arc<dyn CookieGenerator>) -> Self {
		self.cookie_generator = Some(cookies);
		self
	}

	/// Replaces the HTTP transport, e.g. to route bulks through a proxy client.
	pub fn transport(mut self, transport: Arc<dyn BulkTransport>) -> Self {
		self.transport = Some(transport);
		self
	}

	/// Receives commands the server rejected.
	pub fn error_hook<H: CommandErrorHook>(mut self, hook: H) -> Self {
		self.error_hook = Some(Arc::new(hook));
		self
	}

	pub fn config(mut self, config: TrackerConfig) -> Self {
		self.config = config;
		self
	}

	/// Restores persisted state, resumes or starts the session, and spawns the
	/// send loop on the current tokio runtime.
	pub async fn build(self) -> Result<TrackerClient> {
		let company_token = self
			.company_token
			.filter(|token| !token.trim().is_empty())
			.ok_or(TrackerError::InvalidCompanyToken)?;

		let mut config = self.config;
		if let Some(target) = self.target {
			config.target = target;
		}
		config.target = config.target.trim().trim_end_matches('/').to_string();
		config.validate()?;

		let transport: Arc<dyn BulkTransport> = match self.transport {
			Some(transport) => transport,
			None => Arc::new(HttpTransport::new(&config.target, config.request_timeout())?),
		};

		let store = match self.store {
			Some(store) => store,
			None => default_store(),
		};
		let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
		let device = self.device.unwrap_or_else(|| Arc::new(HostDeviceInfo));
		let cookies = self
			.cookie_generator
			.unwrap_or_else(|| Arc::new(UuidCookieGenerator));
		let error_hook = self
			.error_hook
			.unwrap_or_else(|| Arc::new(NoOpCommandErrorHook));

		let queue = Arc::new(PersistentBulkQueue::load(
			store.clone(),
			KEY_COMMAND_QUEUE,
			config.queue_capacity_bytes,
		));

		let session = Arc::new(SessionManager::new(
			SessionDeps {
				store,
				queue: queue.clone(),
				clock: clock.clone(),
				device: device.clone(),
				cookies,
			},
			config.session_config(),
		));
		session.initialize(&company_token);

		let sender = Arc::new(BulkSender::new(
			queue.clone(),
			session.clone(),
			transport,
			error_hook,
			clock.clone(),
			SenderSettings::from_config(&config),
		));

		let task = {
			let sender = sender.clone();
			tokio::spawn(async move { sender.run().await })
		};

		info!(
			url = %config.target,
			pending = queue.len(),
			identity = %session.identity(),
			"Tracker client initialized"
		);

		Ok(TrackerClient {
			inner: Arc::new(TrackerClientInner {
				company_token,
				queue,
				session,
				sender,
				clock,
				device,
				task: Mutex::new(Some(task)),
				closed: AtomicBool::new(false),
			}),
		})
	}
}

impl Default for TrackerClientBuilder {
	fn default() -> Self {
		Self::new()
	}
}

fn default_store() -> Arc<dyn KeyValueStore> {
	match FileStore::default_dir() {
		Some(dir) => {
			debug!(dir = %dir.display(), "Using file store");
			Arc::new(FileStore::new(dir))
		}
		None => {
			warn!("No data directory available, tracker state will not survive restarts");
			Arc::new(MemoryStore::new())
		}
	}
}

struct TrackerClientInner {
	company_token: String,
	queue: Arc<PersistentBulkQueue>,
	session: Arc<SessionManager>,
	sender: Arc<BulkSender>,
	clock: Arc<dyn Clock>,
	device: Arc<dyn DeviceInfoProvider>,
	task: Mutex<Option<JoinHandle<()>>>,
	closed: AtomicBool,
}

/// Records events and customer updates and delivers them in the background.
///
/// # Example
///
/// ```ignore
/// let client = TrackerClient::builder()
///     .company_token("0b3fd5a2-...")
///     .build()
///     .await?;
///
/// client.identify("player-42", None)?;
/// client.track("level_up", Some(Properties::new().insert("level", 7)))?;
///
/// client.shutdown().await?;
/// ```
pub struct TrackerClient {
	inner: Arc<TrackerClientInner>,
}

impl TrackerClient {
	pub fn builder() -> TrackerClientBuilder {
		TrackerClientBuilder::new()
	}

	/// Records `event_type` for the current customer at the current time.
	pub fn track(&self, event_type: &str, properties: Option<Properties>) -> Result<()> {
		let now = self.inner.clock.epoch_seconds() as f64;
		self.track_at(event_type, properties, now)
	}

	/// Records `event_type` at `timestamp` (epoch seconds).
	pub fn track_at(
		&self,
		event_type: &str,
		properties: Option<Properties>,
		timestamp: f64,
	) -> Result<()> {
		self.check_closed()?;
		let command = Command::track(
			self.context(),
			event_type,
			properties.map(Properties::into_map),
			timestamp,
		);
		self.schedule(command);
		Ok(())
	}

	/// Updates properties of the current customer.
	pub fn update(&self, properties: Properties) -> Result<()> {
		self.check_closed()?;
		self.schedule(Command::update(self.context(), Some(properties.into_map())));
		Ok(())
	}

	/// Associates the current customer with `registered`.
	///
	/// Identifying as a different user than before ends the session and
	/// continues with a new anonymous cookie. A changed identity is recorded
	/// as an `identification` event. When the identity changed or properties
	/// are given, a customer update is sent for the new identity.
	pub fn identify(&self, registered: &str, properties: Option<Properties>) -> Result<()> {
		self.check_closed()?;
		let change = self.inner.session.update_identity(registered);
		debug!(?change, "Identify");

		if change != IdentityChange::Unchanged {
			let mut automatic = self.inner.session.automatic_properties();
			automatic.insert(ID_REGISTERED.to_string(), registered.into());
			let now = self.inner.clock.epoch_seconds() as f64;
			self.schedule(Command::track(
				self.context(),
				EVENT_IDENTIFICATION,
				Some(automatic),
				now,
			));
		}

		if change != IdentityChange::Unchanged || properties.is_some() {
			let properties = properties.map(Properties::into_map);
			self.schedule(Command::update(self.context(), properties));
		}
		Ok(())
	}

	/// Forgets the registered id and continues as a new anonymous customer.
	///
	/// The new customer is announced with an empty customer update.
	pub fn reset(&self) -> Result<()> {
		self.check_closed()?;
		self.inner.session.reset();
		self.schedule(Command::update(self.context(), None));
		Ok(())
	}

	/// Records an in-game purchase made with virtual currency.
	pub fn track_virtual_payment(
		&self,
		currency: &str,
		amount: f64,
		item_name: &str,
		item_type: &str,
	) -> Result<()> {
		let device = self.inner.device.device_info();
		let mut properties = PropertyMap::new();
		properties.insert("currency".to_string(), currency.into());
		properties.insert("amount".to_string(), amount.into());
		properties.insert("item_name".to_string(), item_name.into());
		properties.insert("item_type".to_string(), item_type.into());
		properties.insert(PROPERTY_PLATFORM.to_string(), device.platform.into());
		properties.insert(PROPERTY_DEVICE.to_string(), device.device.into());

		self.track(EVENT_VIRTUAL_PAYMENT, Some(Properties::from(properties)))
	}

	/// The identity new commands are attributed to.
	pub fn identity(&self) -> Identity {
		self.inner.session.identity()
	}

	/// Number of commands waiting for delivery.
	pub fn queue_len(&self) -> usize {
		self.inner.queue.len()
	}

	/// Asks the send loop to deliver queued commands now.
	pub fn flush(&self) -> Result<()> {
		self.check_closed()?;
		self.inner.sender.flush();
		Ok(())
	}

	/// Caps the persisted queue size, dropping the newest commands that do not fit.
	pub fn set_queue_capacity_bytes(&self, bytes: usize) -> Result<()> {
		self.check_closed()?;
		self.inner.queue.set_capacity_bytes(bytes);
		Ok(())
	}

	/// Stops the send loop after a last delivery attempt.
	///
	/// Queued commands that could not be delivered stay persisted for the next
	/// client. Calling this more than once is a no-op.
	pub async fn shutdown(&self) -> Result<()> {
		if self.inner.closed.swap(true, Ordering::SeqCst) {
			return Ok(());
		}

		self.inner.sender.shutdown();
		let task = self.inner.task.lock().take();
		if let Some(task) = task {
			if let Err(e) = task.await {
				warn!(error = %e, "Tracker send loop ended abnormally");
			}
		}

		info!(pending = self.inner.queue.len(), "Tracker client shutdown");
		Ok(())
	}

	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::SeqCst)
	}

	fn check_closed(&self) -> Result<()> {
		if self.is_closed() {
			return Err(TrackerError::ClientShutdown);
		}
		Ok(())
	}

	fn context(&self) -> CommandContext {
		CommandContext::new(self.inner.session.identity(), self.inner.company_token.clone())
	}

	fn schedule(&self, command: Command) {
		self.inner.queue.enqueue([command.to_envelope()]);
	}
}

impl Drop for TrackerClient {
	fn drop(&mut self) {
		if !self.is_closed() {
			self.inner.sender.shutdown();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::clock::ManualClock;
	use crate::device::DeviceInfo;
	use crate::sender::CommandError;
	use async_trait::async_trait;
	use loom_tracker_core::{BulkRequest, Envelope};
	use serde_json::json;
	use std::time::Duration;

	const T0: i64 = 1_700_000_000;

	/// Always fails, so everything stays queued.
	struct UnavailableTransport;

	#[async_trait]
	impl BulkTransport for UnavailableTransport {
		async fn send_bulk(&self, _request: &BulkRequest) -> Result<String> {
			Err(TrackerError::ServerError {
				status: 503,
				message: "unavailable".to_string(),
			})
		}
	}

	struct IgnoreErrors;

	#[async_trait]
	impl CommandErrorHook for IgnoreErrors {
		async fn on_command_error(&self, _error: CommandError) {}
	}

	async fn client(store: Arc<MemoryStore>) -> TrackerClient {
		TrackerClient::builder()
			.company_token("token")
			.store(store)
			.clock(Arc::new(ManualClock::new(T0)))
			.device(Arc::new(DeviceInfo::new("Linux", "x86_64")))
			.transport(Arc::new(UnavailableTransport))
			.error_hook(IgnoreErrors)
			.build()
			.await
			.unwrap()
	}

	fn queued(store: &MemoryStore) -> Vec<Envelope> {
		serde_json::from_str(&store.get(KEY_COMMAND_QUEUE).unwrap().unwrap()).unwrap()
	}

	#[tokio::test]
	async fn build_requires_company_token() {
		let result = TrackerClient::builder()
			.company_token("  ")
			.store(Arc::new(MemoryStore::new()))
			.transport(Arc::new(UnavailableTransport))
			.build()
			.await;
		assert!(matches!(result, Err(TrackerError::InvalidCompanyToken)));
	}

	#[tokio::test]
	async fn build_rejects_bad_target() {
		let result = TrackerClient::builder()
			.company_token("token")
			.target("ftp://example.com")
			.store(Arc::new(MemoryStore::new()))
			.build()
			.await;
		assert!(matches!(result, Err(TrackerError::InvalidTarget(_))));
	}

	#[tokio::test]
	async fn build_rejects_invalid_config() {
		let result = TrackerClient::builder()
			.company_token("token")
			.config(TrackerConfig {
				bulk_limit: 0,
				..TrackerConfig::default()
			})
			.store(Arc::new(MemoryStore::new()))
			.transport(Arc::new(UnavailableTransport))
			.build()
			.await;
		assert!(matches!(result, Err(TrackerError::Config(_))));
	}

	#[tokio::test]
	async fn build_rejects_session_timeout_within_wait_margin() {
		let result = TrackerClient::builder()
			.company_token("token")
			.config(TrackerConfig {
				session_timeout_secs: 2,
				..TrackerConfig::default()
			})
			.store(Arc::new(MemoryStore::new()))
			.transport(Arc::new(UnavailableTransport))
			.build()
			.await;
		assert!(matches!(result, Err(TrackerError::Config(_))));
	}

	#[tokio::test]
	async fn track_queues_event_with_identity() {
		let store = Arc::new(MemoryStore::new());
		let client = client(store.clone()).await;

		client
			.track("level_up", Some(Properties::new().insert("level", 3)))
			.unwrap();

		let queued = queued(&store);
		let event = queued.last().unwrap();
		assert_eq!(event.name, "crm/events");
		assert_eq!(event.data["type"], "level_up");
		assert_eq!(event.data["company_id"], "token");
		assert_eq!(event.data["customer_ids"]["cookie"], json!(client.identity().cookie));
		assert_eq!(event.data["properties"]["level"], 3);
		assert_eq!(event.data["timestamp"], json!(T0 as f64));
	}

	#[tokio::test]
	async fn track_without_properties_omits_them() {
		let store = Arc::new(MemoryStore::new());
		let client = client(store.clone()).await;

		client.track_at("ping", None, 12.5).unwrap();

		let event = queued(&store).pop().unwrap();
		assert!(event.data.get("properties").is_none());
		assert_eq!(event.data["timestamp"], json!(12.5));
	}

	#[tokio::test]
	async fn first_identify_sends_identification_and_update() {
		let store = Arc::new(MemoryStore::new());
		let client = client(store.clone()).await;
		let cookie = client.identity().cookie;
		let before = client.queue_len();

		client
			.identify("alice", Some(Properties::new().insert("plan", "gold")))
			.unwrap();

		assert_eq!(client.queue_len(), before + 2);
		let mut queued = queued(&store);
		let update = queued.pop().unwrap();
		let identification = queued.pop().unwrap();
		assert_eq!(identification.name, "crm/events");
		assert_eq!(identification.data["type"], EVENT_IDENTIFICATION);
		assert_eq!(
			identification.data["properties"],
			json!({"platform": "Linux", "device": "x86_64", "registered": "alice"})
		);
		assert_eq!(identification.data["customer_ids"]["registered"], "alice");
		assert_eq!(update.name, "crm/customers");
		assert_eq!(
			update.data["ids"],
			json!({"cookie": cookie, "registered": "alice"})
		);
		assert_eq!(update.data["properties"]["plan"], "gold");
	}

	#[tokio::test]
	async fn repeated_identify_without_properties_sends_nothing() {
		let store = Arc::new(MemoryStore::new());
		let client = client(store).await;
		client.identify("alice", None).unwrap();
		let before = client.queue_len();

		client.identify("alice", None).unwrap();

		assert_eq!(client.queue_len(), before);
	}

	#[tokio::test]
	async fn switching_user_ends_session_and_updates() {
		let store = Arc::new(MemoryStore::new());
		let client = client(store.clone()).await;
		client.identify("alice", None).unwrap();
		let old_cookie = client.identity().cookie;
		let before = client.queue_len();

		client.identify("bob", None).unwrap();

		let queued = queued(&store);
		let added = &queued[before..];
		assert_eq!(added.len(), 4);
		assert_eq!(added[0].data["type"], "session_end");
		assert_eq!(added[1].data["type"], "session_start");
		assert_eq!(added[2].data["type"], EVENT_IDENTIFICATION);
		assert_eq!(added[2].data["properties"]["registered"], "bob");
		assert_eq!(added[3].name, "crm/customers");
		assert_eq!(added[3].data["ids"]["registered"], "bob");
		assert_ne!(client.identity().cookie, old_cookie);
	}

	#[tokio::test]
	async fn virtual_payment_carries_item_and_device() {
		let store = Arc::new(MemoryStore::new());
		let client = client(store.clone()).await;

		client
			.track_virtual_payment("gems", 150.0, "Sword", "weapon")
			.unwrap();

		let event = queued(&store).pop().unwrap();
		assert_eq!(event.data["type"], EVENT_VIRTUAL_PAYMENT);
		assert_eq!(
			event.data["properties"],
			json!({
				"currency": "gems",
				"amount": 150.0,
				"item_name": "Sword",
				"item_type": "weapon",
				"platform": "Linux",
				"device": "x86_64"
			})
		);
	}

	#[tokio::test]
	async fn reset_drops_registered_id() {
		let store = Arc::new(MemoryStore::new());
		let client = client(store.clone()).await;
		client.identify("alice", None).unwrap();

		client.reset().unwrap();

		assert!(!client.identity().is_registered());
		let update = queued(&store).pop().unwrap();
		assert_eq!(update.name, "crm/customers");
		assert_eq!(update.data["ids"], json!({"cookie": client.identity().cookie}));
		assert!(update.data.get("properties").is_none());
	}

	#[tokio::test]
	async fn identification_carries_app_version() {
		let store = Arc::new(MemoryStore::new());
		let client = TrackerClient::builder()
			.company_token("token")
			.store(store.clone())
			.clock(Arc::new(ManualClock::new(T0)))
			.device(Arc::new(DeviceInfo::new("Linux", "x86_64")))
			.transport(Arc::new(UnavailableTransport))
			.config(TrackerConfig {
				app_version: Some("1.4.0".to_string()),
				..TrackerConfig::default()
			})
			.build()
			.await
			.unwrap();

		client.identify("alice", None).unwrap();

		let identification = queued(&store)
			.into_iter()
			.find(|e| e.data["type"] == EVENT_IDENTIFICATION)
			.unwrap();
		assert_eq!(identification.data["properties"]["app_version"], "1.4.0");
		assert_eq!(identification.data["timestamp"], json!(T0 as f64));
	}

	#[tokio::test]
	async fn shutdown_is_idempotent_and_closes_client() {
		let store = Arc::new(MemoryStore::new());
		let client = client(store.clone()).await;
		client.track("queued", None).unwrap();
		let pending = client.queue_len();

		tokio::time::timeout(Duration::from_secs(5), client.shutdown())
			.await
			.unwrap()
			.unwrap();
		client.shutdown().await.unwrap();

		assert!(client.is_closed());
		assert!(matches!(
			client.track("late", None),
			Err(TrackerError::ClientShutdown)
		));
		assert!(matches!(client.flush(), Err(TrackerError::ClientShutdown)));
		assert_eq!(queued(&store).len(), pending);
	}

	#[tokio::test]
	async fn queue_survives_client_restart() {
		let store = Arc::new(MemoryStore::new());
		{
			let client = client(store.clone()).await;
			client.track("before_restart", None).unwrap();
			client.shutdown().await.unwrap();
		}

		let client = client(store.clone()).await;
		let types: Vec<_> = queued(&store)
			.iter()
			.map(|e| e.data["type"].clone())
			.collect();
		assert!(types.contains(&json!("before_restart")));
		assert_eq!(client.queue_len(), types.len());
	}
}
