//! Helper functions for mock Kubernetes testing.

use serde_json::Value;

/// Apply a JSON merge patch (RFC 7396) to a base document.
///
/// Objects merge by key, `null` removes a key, anything else replaces.
pub fn merge_patch(base: Value, patch: Value) -> Value {
	match (base, patch) {
		(Value::Object(mut base_map), Value::Object(patch_map)) => {
			for (key, patch_value) in patch_map {
				if patch_value.is_null() {
					base_map.remove(&key);
					continue;
				}
				let base_value = base_map.remove(&key).unwrap_or(Value::Null);
				base_map.insert(key, merge_patch(base_value, patch_value));
			}
			Value::Object(base_map)
		}
		(_, Value::Object(patch_map)) => {
			merge_patch(Value::Object(Default::default()), Value::Object(patch_map))
		}
		(_, patch) => patch,
	}
}

/// Read `metadata.resourceVersion` as a string.
pub fn resource_version(value: &Value) -> Option<&str> {
	value.pointer("/metadata/resourceVersion")?.as_str()
}

/// Set `metadata.resourceVersion`, creating `metadata` when missing.
pub fn set_resource_version(value: &mut Value, version: u64) {
	if let Value::Object(obj) = value {
		let metadata = obj
			.entry("metadata")
			.or_insert_with(|| Value::Object(Default::default()));
		if let Value::Object(metadata) = metadata {
			metadata.insert(
				"resourceVersion".to_string(),
				Value::String(version.to_string()),
			);
		}
	}
}

/// Next resource version after the one stored on `value`.
pub fn next_resource_version(value: &Value) -> u64 {
	resource_version(value)
		.and_then(|v| v.parse::<u64>().ok())
		.unwrap_or(0)
		+ 1
}

/// Check an object's labels against an equality-based label selector.
///
/// Supports `k=v`, `k==v`, `k!=v`, `k` (exists) and `!k` (does not exist),
/// comma separated.
pub fn selector_matches(selector: &str, object: &Value) -> bool {
	let labels = object.pointer("/metadata/labels").and_then(Value::as_object);
	let label = |key: &str| labels.and_then(|l| l.get(key)).and_then(Value::as_str);

	selector
		.split(',')
		.map(str::trim)
		.filter(|req| !req.is_empty())
		.all(|req| {
			if let Some((key, value)) = req.split_once("!=") {
				label(key.trim()) != Some(value.trim())
			} else if let Some((key, value)) = req.split_once("==") {
				label(key.trim()) == Some(value.trim())
			} else if let Some((key, value)) = req.split_once('=') {
				label(key.trim()) == Some(value.trim())
			} else if let Some(key) = req.strip_prefix('!') {
				label(key.trim()).is_none()
			} else {
				label(req).is_some()
			}
		})
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn merge_patch_removes_null_keys() {
		let merged = merge_patch(
			json!({"a": 1, "b": {"c": 2, "d": 3}}),
			json!({"a": null, "b": {"c": 4}}),
		);
		assert_eq!(merged, json!({"b": {"c": 4, "d": 3}}));
	}

	#[test]
	fn merge_patch_replaces_arrays() {
		let merged = merge_patch(json!({"a": [1, 2]}), json!({"a": [3]}));
		assert_eq!(merged, json!({"a": [3]}));
	}

	#[test]
	fn selector_matching() {
		let obj = json!({"metadata": {"labels": {"app": "web", "tier": "front"}}});
		assert!(selector_matches("app=web", &obj));
		assert!(selector_matches("app==web,tier", &obj));
		assert!(selector_matches("app!=db", &obj));
		assert!(selector_matches("!missing", &obj));
		assert!(!selector_matches("app=db", &obj));
		assert!(!selector_matches("tier,!app", &obj));
	}
}
