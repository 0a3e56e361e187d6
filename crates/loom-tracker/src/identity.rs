// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Persisted identity of the current actor.

use std::sync::Arc;

use loom_tracker_core::Identity;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::store::{KeyValueStore, KEY_IDENTITY};

/// Generates anonymous cookies.
pub trait CookieGenerator: Send + Sync {
	fn generate(&self) -> String;
}

/// Generates random v4 UUID cookies.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidCookieGenerator;

impl CookieGenerator for UuidCookieGenerator {
	fn generate(&self) -> String {
		Uuid::new_v4().to_string()
	}
}

/// Holds the current [`Identity`] and writes it through to the store.
pub struct IdentityStore {
	store: Arc<dyn KeyValueStore>,
	current: Identity,
}

impl IdentityStore {
	/// Loads the persisted identity, generating and persisting a fresh
	/// anonymous one when none is stored or the stored one is unusable.
	pub fn load_or_generate(store: Arc<dyn KeyValueStore>, cookies: &dyn CookieGenerator) -> Self {
		match load(store.as_ref()) {
			Some(current) => {
				debug!(identity = %current, "Loaded persisted identity");
				Self { store, current }
			}
			None => {
				let mut identity_store = Self {
					store,
					current: Identity::new(cookies.generate()),
				};
				identity_store.persist();
				debug!(identity = %identity_store.current, "Generated new identity");
				identity_store
			}
		}
	}

	pub fn current(&self) -> &Identity {
		&self.current
	}

	/// Replaces the identity, persisting it if it changed.
	pub fn replace(&mut self, identity: Identity) {
		if identity != self.current {
			self.current = identity;
			self.persist();
		}
	}

	fn persist(&mut self) {
		let json = match serde_json::to_string(&self.current) {
			Ok(json) => json,
			Err(e) => {
				error!(error = %e, "Failed to serialize identity");
				return;
			}
		};
		if let Err(e) = self.store.set(KEY_IDENTITY, &json) {
			error!(error = %e, "Failed to persist identity");
		}
	}
}

fn load(store: &dyn KeyValueStore) -> Option<Identity> {
	let raw = match store.get(KEY_IDENTITY) {
		Ok(raw) => raw?,
		Err(e) => {
			error!(error = %e, "Failed to read persisted identity");
			return None;
		}
	};
	match serde_json::from_str::<Identity>(&raw) {
		Ok(identity) if !identity.cookie.is_empty() => Some(identity),
		Ok(_) => {
			warn!("Persisted identity has an empty cookie, discarding");
			None
		}
		Err(e) => {
			warn!(error = %e, "Persisted identity is corrupt, discarding");
			None
		}
	}
}
