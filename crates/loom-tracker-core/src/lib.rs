// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Loom event tracker.
//!
//! This crate holds the data model shared by the tracker SDK:
//!
//! - [`Identity`]: the anonymous cookie / registered id pair of the current actor
//! - [`Command`]: the closed set of commands (track an event, update a customer)
//! - [`Envelope`]: the `{name, data}` unit that is persisted and sent in bulk
//! - [`SessionRecord`]: the persisted state of the active session
//! - [`BulkRequest`] / [`BulkResponse`]: the `/bulk` wire protocol

pub mod command;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod session;

pub use command::{Command, CommandContext, Endpoint, PropertyMap, TimeField};
pub use envelope::{BulkRequest, BulkResponse, CommandResult, CommandStatus, Envelope};
pub use error::{CoreError, Result};
pub use identity::{Identity, ID_COOKIE, ID_REGISTERED};
pub use session::{SessionEndReason, SessionRecord};
