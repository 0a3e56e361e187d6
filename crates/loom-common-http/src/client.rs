// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP client construction for Loom SDKs.

use reqwest::{Client, ClientBuilder};

/// Returns a client builder identifying the calling SDK.
///
/// # Example
/// ```ignore
/// let client = loom_common_http::sdk_builder("loom-tracker-rust", env!("CARGO_PKG_VERSION"))
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// ```
pub fn sdk_builder(sdk_name: &str, sdk_version: &str) -> ClientBuilder {
	Client::builder().user_agent(sdk_user_agent(sdk_name, sdk_version))
}

/// User-Agent sent by SDK clients.
///
/// Format: `{sdk_name}/{sdk_version} ({os}-{arch})`
pub fn sdk_user_agent(sdk_name: &str, sdk_version: &str) -> String {
	format!(
		"{sdk_name}/{sdk_version} ({}-{})",
		std::env::consts::OS,
		std::env::consts::ARCH
	)
}
