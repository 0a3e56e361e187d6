// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable event tracking SDK.
//!
//! Track and customer-update commands are appended to a persistent queue and
//! delivered in bulk by a background task. Nothing is lost when the process
//! exits or the network is down: the queue is written through to a
//! [`KeyValueStore`] on every change and resumes on the next start.
//!
//! # Features
//!
//! - **Durable queue**: every enqueue is persisted before the call returns
//! - **Bulk delivery**: up to 49 commands per request, with per-command
//!   `ok` / `retry` / `error` verdicts
//! - **Backoff**: `base^sqrt(failures + 1)` seconds between failing attempts
//! - **Sessions**: `session_start` / `session_end` events with timeout and
//!   identity-switch handling
//!
//! # Example
//!
//! ```ignore
//! use loom_tracker::{Properties, TrackerClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = TrackerClient::builder()
//!         .company_token("0b3fd5a2-...")
//!         .build()
//!         .await?;
//!
//!     client.identify("player-42", Some(Properties::new().insert("plan", "gold")))?;
//!     client.track("level_up", Some(Properties::new().insert("level", 7)))?;
//!     client.track_virtual_payment("gems", 150.0, "Sword", "weapon")?;
//!
//!     client.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod client;
mod clock;
mod config;
mod device;
mod error;
mod identity;
mod properties;
mod queue;
mod sender;
mod session;
mod store;

pub use client::{
	TrackerClient, TrackerClientBuilder, EVENT_IDENTIFICATION, EVENT_VIRTUAL_PAYMENT,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{TrackerConfig, DEFAULT_TARGET};
pub use device::{DeviceInfo, DeviceInfoProvider, HostDeviceInfo};
pub use error::{ConfigError, Result, StoreError, TrackerError};
pub use identity::{CookieGenerator, IdentityStore, UuidCookieGenerator};
pub use properties::Properties;
pub use queue::{PersistentBulkQueue, DEFAULT_CAPACITY_BYTES};
pub use sender::{
	BulkSender, BulkTransport, CommandError, CommandErrorHook, HttpTransport,
	NoOpCommandErrorHook, SendOutcome, SenderSettings, SharedCommandErrorHook,
};
pub use session::{
	IdentityChange, SessionConfig, SessionDeps, SessionManager, SessionPhase, EVENT_SESSION_END,
	EVENT_SESSION_START,
};
pub use store::{FileStore, KeyValueStore, MemoryStore, KEY_COMMAND_QUEUE, KEY_IDENTITY, KEY_SESSION};

// Re-export core types for convenience
pub use loom_tracker_core::{
	BulkRequest, BulkResponse, Command, CommandContext, CommandResult, CommandStatus, Endpoint,
	Envelope, Identity, PropertyMap, SessionEndReason, SessionRecord, TimeField,
};
