// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared HTTP utilities for Loom.
//!
//! This crate provides:
//! - An HTTP client builder that identifies the calling SDK
//! - The root-exponential backoff used by SDK send loops
//! - [`RetryableError`] for classifying transient failures

mod backoff;
mod client;
mod retry;

pub use backoff::RootExponentialBackoff;
pub use client::{sdk_builder, sdk_user_agent};
pub use retry::RetryableError;
