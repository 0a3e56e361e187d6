// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Platform and device description attached to session events.

/// Platform and device model of the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
	pub platform: String,
	pub device: String,
}

impl DeviceInfo {
	pub fn new(platform: impl Into<String>, device: impl Into<String>) -> Self {
		Self {
			platform: platform.into(),
			device: device.into(),
		}
	}
}

/// Supplies the [`DeviceInfo`] captured when a session starts.
pub trait DeviceInfoProvider: Send + Sync {
	fn device_info(&self) -> DeviceInfo;
}

/// Describes the host from compile-time target information.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostDeviceInfo;

impl DeviceInfoProvider for HostDeviceInfo {
	fn device_info(&self) -> DeviceInfo {
		DeviceInfo::new(platform_name(std::env::consts::OS), std::env::consts::ARCH)
	}
}

impl DeviceInfoProvider for DeviceInfo {
	fn device_info(&self) -> DeviceInfo {
		self.clone()
	}
}

fn platform_name(os: &str) -> &'static str {
	match os {
		"android" => "Android",
		"ios" => "iOS",
		"linux" => "Linux",
		"macos" => "Mac OS X",
		"windows" => "Windows",
		_ => "Other",
	}
}
