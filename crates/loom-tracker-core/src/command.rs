// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Track and update commands and their payloads.
//!
//! A command captures a copy of the identity and company token at the moment
//! it is created, so identity changes made afterwards never leak into commands
//! that are already queued.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::envelope::Envelope;
use crate::identity::Identity;

/// Free-form properties attached to an event or a customer.
pub type PropertyMap = Map<String, Value>;

/// Payload field carrying the event time as epoch seconds.
pub const FIELD_TIMESTAMP: &str = "timestamp";
/// Payload field carrying the event time as seconds elapsed before sending.
pub const FIELD_AGE: &str = "age";

/// Remote endpoint a command is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
	/// Customer events.
	Events,
	/// Customer properties.
	Customers,
}

impl Endpoint {
	/// Returns the endpoint name used in envelopes.
	pub fn as_str(&self) -> &'static str {
		match self {
			Endpoint::Events => "crm/events",
			Endpoint::Customers => "crm/customers",
		}
	}
}

impl std::fmt::Display for Endpoint {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// How the event time is represented when a bulk is sent.
///
/// Envelopes are always stored with the raw `timestamp`; [`TimeField::Age`]
/// rewrites it into `age` at send time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeField {
	/// `"timestamp": <epoch seconds>`.
	#[default]
	Timestamp,
	/// `"age": <seconds between the event and the send attempt>`.
	Age,
}

/// The identity and company a command is attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandContext {
	pub identity: Identity,
	pub company_token: String,
}

impl CommandContext {
	pub fn new(identity: Identity, company_token: impl Into<String>) -> Self {
		Self {
			identity,
			company_token: company_token.into(),
		}
	}
}

/// A command to be delivered to the tracking backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
	/// Records an event for a customer.
	Track {
		context: CommandContext,
		event_type: String,
		properties: Option<PropertyMap>,
		timestamp: f64,
	},
	/// Updates properties of a customer.
	Update {
		context: CommandContext,
		properties: Option<PropertyMap>,
	},
}

impl Command {
	/// Creates a track command.
	pub fn track(
		context: CommandContext,
		event_type: impl Into<String>,
		properties: Option<PropertyMap>,
		timestamp: f64,
	) -> Self {
		Command::Track {
			context,
			event_type: event_type.into(),
			properties,
			timestamp,
		}
	}

	/// Creates an update command.
	pub fn update(context: CommandContext, properties: Option<PropertyMap>) -> Self {
		Command::Update {
			context,
			properties,
		}
	}

	pub fn endpoint(&self) -> Endpoint {
		match self {
			Command::Track { .. } => Endpoint::Events,
			Command::Update { .. } => Endpoint::Customers,
		}
	}

	pub fn context(&self) -> &CommandContext {
		match self {
			Command::Track { context, .. } | Command::Update { context, .. } => context,
		}
	}

	/// Builds the JSON payload of this command.
	///
	/// Properties are omitted entirely when absent, so "no properties" and
	/// "empty properties" stay distinguishable on the wire.
	pub fn payload(&self) -> Value {
		let mut data = Map::new();
		match self {
			Command::Track {
				context,
				event_type,
				properties,
				timestamp,
			} => {
				data.insert(
					"customer_ids".to_string(),
					Value::Object(context.identity.to_ids_map()),
				);
				data.insert(
					"company_id".to_string(),
					Value::String(context.company_token.clone()),
				);
				data.insert("type".to_string(), Value::String(event_type.clone()));
				if let Some(properties) = properties {
					data.insert("properties".to_string(), Value::Object(properties.clone()));
				}
				data.insert(FIELD_TIMESTAMP.to_string(), Value::from(*timestamp));
			}
			Command::Update {
				context,
				properties,
			} => {
				data.insert(
					"ids".to_string(),
					Value::Object(context.identity.to_ids_map()),
				);
				data.insert(
					"company_id".to_string(),
					Value::String(context.company_token.clone()),
				);
				if let Some(properties) = properties {
					data.insert("properties".to_string(), Value::Object(properties.clone()));
				}
			}
		}
		Value::Object(data)
	}

	/// Wraps the payload into its storage and wire envelope.
	pub fn to_envelope(&self) -> Envelope {
		Envelope::new(self.endpoint().as_str(), self.payload())
	}
}
