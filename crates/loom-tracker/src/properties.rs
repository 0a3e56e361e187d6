// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Builder for event and customer properties.

use loom_tracker_core::PropertyMap;
use serde_json::Value;

/// Properties attached to a track or update command.
///
/// ```
/// use loom_tracker::Properties;
///
/// let props = Properties::new()
///     .insert("level", 7)
///     .insert("mode", "hard")
///     .insert("won", true);
/// assert_eq!(props.len(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
	inner: PropertyMap,
}

impl Properties {
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets `key` to `value`, replacing any previous value.
	pub fn insert<K, V>(mut self, key: K, value: V) -> Self
	where
		K: Into<String>,
		V: Into<Value>,
	{
		self.inner.insert(key.into(), value.into());
		self
	}

	/// Copies every entry of `other` into `self`; `other` wins on conflicts.
	pub fn merge(mut self, other: Properties) -> Self {
		self.inner.extend(other.inner);
		self
	}

	pub fn is_empty(&self) -> bool {
		self.inner.is_empty()
	}

	pub fn len(&self) -> usize {
		self.inner.len()
	}

	pub fn get(&self, key: &str) -> Option<&Value> {
		self.inner.get(key)
	}

	pub fn into_map(self) -> PropertyMap {
		self.inner
	}
}

impl From<PropertyMap> for Properties {
	fn from(inner: PropertyMap) -> Self {
		Self { inner }
	}
}

impl From<Properties> for PropertyMap {
	fn from(props: Properties) -> Self {
		props.inner
	}
}

/// Non-object values yield empty properties.
impl From<Value> for Properties {
	fn from(value: Value) -> Self {
		match value {
			Value::Object(inner) => Self { inner },
			_ => Self::new(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;
	use serde_json::json;

	#[test]
	fn insert_accepts_json_scalars() {
		let props = Properties::new()
			.insert("currency", "EUR")
			.insert("amount", 4.99)
			.insert("count", 2)
			.insert("gift", false);

		assert_eq!(props.get("currency"), Some(&json!("EUR")));
		assert!(props.get("amount").unwrap().is_f64());
		assert_eq!(props.get("count"), Some(&json!(2)));
		assert_eq!(props.get("gift"), Some(&json!(false)));
	}

	#[test]
	fn later_insert_replaces_value() {
		let props = Properties::new().insert("level", 1).insert("level", 2);
		assert_eq!(props.len(), 1);
		assert_eq!(props.get("level"), Some(&json!(2)));
	}

	#[test]
	fn merge_prefers_other() {
		let base = Properties::new().insert("platform", "Linux").insert("score", 1);
		let merged = base.merge(Properties::new().insert("score", 10));

		assert_eq!(merged.len(), 2);
		assert_eq!(merged.get("platform"), Some(&json!("Linux")));
		assert_eq!(merged.get("score"), Some(&json!(10)));
	}

	#[test]
	fn from_value_keeps_objects_only() {
		let props = Properties::from(json!({"item": "sword", "price": 100}));
		assert_eq!(props.len(), 2);

		assert!(Properties::from(json!([1, 2, 3])).is_empty());
		assert!(Properties::from(Value::Null).is_empty());
	}

	#[test]
	fn into_map_yields_entries() {
		let map = Properties::new().insert("a", 1).into_map();
		assert_eq!(Value::Object(map), json!({"a": 1}));
	}

	proptest! {
		#[test]
		fn len_counts_distinct_keys(keys in proptest::collection::vec("[a-z]{1,8}", 0..20)) {
			let distinct: std::collections::HashSet<_> = keys.iter().cloned().collect();
			let props = keys
				.iter()
				.fold(Properties::new(), |props, key| props.insert(key.clone(), 0));
			prop_assert_eq!(props.len(), distinct.len());
		}
	}
}
