// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Key-value persistence for tracker state.
//!
//! The tracker keeps three string blobs under separate keys:
//!
//! | Key | Contents |
//! |-----|----------|
//! | `command_queue` | JSON array of envelopes |
//! | `session` | JSON session record |
//! | `identity` | JSON `{cookie, registered?}` |
//!
//! Each key has exactly one owning component, so stores do not need
//! cross-key transactions.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::StoreError;

/// Key holding the persisted command queue.
pub const KEY_COMMAND_QUEUE: &str = "command_queue";
/// Key holding the persisted session record.
pub const KEY_SESSION: &str = "session";
/// Key holding the persisted identity.
pub const KEY_IDENTITY: &str = "identity";

/// A synchronous string blob store.
///
/// `set` must not return before the value is durable (or definitively
/// failed); callers rely on that for write-through persistence.
pub trait KeyValueStore: Send + Sync {
	fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
	fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// An in-process store. State is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
	entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}
}

impl KeyValueStore for MemoryStore {
	fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
		Ok(self.entries.lock().get(key).cloned())
	}

	fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
		self
			.entries
			.lock()
			.insert(key.to_string(), value.to_string());
		Ok(())
	}
}

/// A store keeping one file per key under a directory.
///
/// Writes go to a temporary file which is synced and renamed over the
/// destination, and the directory is synced afterwards, so a crash leaves
/// either the old or the new value.
#[derive(Debug, Clone)]
pub struct FileStore {
	dir: PathBuf,
}

impl FileStore {
	/// Creates a store rooted at `dir`. The directory is created on first write.
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into() }
	}

	/// Default location: `$XDG_DATA_HOME/loom/tracker` (or the platform equivalent).
	pub fn default_dir() -> Option<PathBuf> {
		dirs::data_dir().map(|p| p.join("loom").join("tracker"))
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
		let valid = !key.is_empty()
			&& key
				.chars()
				.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
		if !valid {
			return Err(StoreError::InvalidKey(key.to_string()));
		}
		Ok(self.dir.join(format!("{key}.json")))
	}
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
	move |source| StoreError::Io {
		path: path.to_path_buf(),
		source,
	}
}

impl KeyValueStore for FileStore {
	fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
		let path = self.path_for(key)?;
		match fs::read_to_string(&path) {
			Ok(contents) => Ok(Some(contents)),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(io_error(&path)(e)),
		}
	}

	fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
		let path = self.path_for(key)?;
		fs::create_dir_all(&self.dir).map_err(io_error(&self.dir))?;

		let tmp_path = path.with_extension("json.tmp");
		{
			let mut file = File::create(&tmp_path).map_err(io_error(&tmp_path))?;
			file
				.write_all(value.as_bytes())
				.map_err(io_error(&tmp_path))?;
			file.sync_all().map_err(io_error(&tmp_path))?;
		}
		fs::rename(&tmp_path, &path).map_err(io_error(&path))?;
		sync_dir(&self.dir)
	}
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<(), StoreError> {
	let handle = OpenOptions::new()
		.read(true)
		.open(dir)
		.map_err(io_error(dir))?;
	handle.sync_all().map_err(io_error(dir))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<(), StoreError> {
	Ok(())
}
