//! Resource requirement updates for `set resources`.

use std::{collections::BTreeMap, sync::LazyLock};

use glob::Pattern;
use regex::Regex;
use serde_json::{Map, Value};

use super::error::ValidationError;

/// Kubernetes quantity syntax: a signed decimal with an optional binary,
/// decimal or exponent suffix.
static QUANTITY: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+|[KMGTPE]i|[numkMGTPE])?$")
		.expect("quantity regex is valid")
});

/// Parse a `name=quantity,...` list such as `cpu=200m,memory=512Mi`.
///
/// `flag` names the option the list came from, for error messages.
pub fn parse_resource_list(
	flag: &'static str,
	input: &str,
) -> Result<BTreeMap<String, String>, ValidationError> {
	let invalid = |entry: &str| ValidationError::InvalidRequirement {
		flag,
		entry: entry.to_string(),
	};
	let mut list = BTreeMap::new();
	for entry in input.split(',').map(str::trim).filter(|e| !e.is_empty()) {
		let Some((name, quantity)) = entry.split_once('=') else {
			return Err(invalid(entry));
		};
		let (name, quantity) = (name.trim(), quantity.trim());
		if name.is_empty() || !QUANTITY.is_match(quantity) {
			return Err(invalid(entry));
		}
		list.insert(name.to_string(), quantity.to_string());
	}
	Ok(list)
}

/// Limits and requests to merge into the selected containers.
#[derive(Debug, Clone)]
pub struct ResourceUpdate {
	selector: String,
	pattern: Pattern,
	pub limits: BTreeMap<String, String>,
	pub requests: BTreeMap<String, String>,
}

impl ResourceUpdate {
	/// Build an update from the raw flag values.
	///
	/// At least one of limits or requests must be given. The container
	/// selector is a glob; `*` selects every container.
	pub fn new(
		selector: &str,
		limits: Option<&str>,
		requests: Option<&str>,
	) -> Result<Self, ValidationError> {
		let limits = limits
			.map(|input| parse_resource_list("--limits", input))
			.transpose()?
			.unwrap_or_default();
		let requests = requests
			.map(|input| parse_resource_list("--requests", input))
			.transpose()?
			.unwrap_or_default();
		if limits.is_empty() && requests.is_empty() {
			return Err(ValidationError::MissingRequirements);
		}

		let pattern = Pattern::new(selector)
			.map_err(|_| ValidationError::InvalidContainerSelector(selector.to_string()))?;

		Ok(Self {
			selector: selector.to_string(),
			pattern,
			limits,
			requests,
		})
	}

	pub fn selector(&self) -> &str {
		&self.selector
	}

	pub fn matches(&self, container_name: &str) -> bool {
		self.pattern.matches(container_name)
	}

	/// Merge the update into one container's `resources`, keeping unrelated keys.
	pub(super) fn merge_into(&self, container: &mut Map<String, Value>) {
		let resources = object_entry(container, "resources");
		for (field, values) in [("limits", &self.limits), ("requests", &self.requests)] {
			if values.is_empty() {
				continue;
			}
			let target = object_entry(resources, field);
			for (name, quantity) in values {
				target.insert(name.clone(), Value::String(quantity.clone()));
			}
		}
	}
}

/// Get `map[key]` as an object, replacing anything that is not one.
pub(super) fn object_entry<'a>(map: &'a mut Map<String, Value>, key: &str) -> &'a mut Map<String, Value> {
	let entry = map
		.entry(key.to_string())
		.or_insert_with(|| Value::Object(Map::new()));
	if !entry.is_object() {
		*entry = Value::Object(Map::new());
	}
	match entry {
		Value::Object(obj) => obj,
		_ => unreachable!("entry was just made an object"),
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use rstest::rstest;
	use serde_json::json;

	use super::*;

	#[test]
	fn test_parse_resource_list() {
		let list = parse_resource_list("--limits", "cpu=200m, memory=512Mi,nvidia.com/gpu=1").unwrap();
		assert_eq!(list.get("cpu").map(String::as_str), Some("200m"));
		assert_eq!(list.get("memory").map(String::as_str), Some("512Mi"));
		assert_eq!(list.get("nvidia.com/gpu").map(String::as_str), Some("1"));
	}

	#[rstest]
	#[case("cpu")]
	#[case("cpu=")]
	#[case("=100m")]
	#[case("memory=lots")]
	#[case("cpu=1.5.5")]
	fn test_parse_resource_list_rejects(#[case] input: &str) {
		assert_matches!(
			parse_resource_list("--limits", input),
			Err(ValidationError::InvalidRequirement { flag: "--limits", .. })
		);
	}

	#[test]
	fn test_invalid_entry_names_its_flag() {
		let err = ResourceUpdate::new("*", Some("cpu=1"), Some("memory=lots")).unwrap_err();
		assert_eq!(
			err,
			ValidationError::InvalidRequirement {
				flag: "--requests",
				entry: "memory=lots".to_string()
			}
		);
		assert_eq!(
			err.to_string(),
			"invalid --requests entry \"memory=lots\": expected name=quantity"
		);
	}

	#[test]
	fn test_update_requires_limits_or_requests() {
		assert_matches!(
			ResourceUpdate::new("*", None, Some("")),
			Err(ValidationError::MissingRequirements)
		);
	}

	#[test]
	fn test_container_selector() {
		let update = ResourceUpdate::new("app-*", Some("cpu=1"), None).unwrap();
		assert!(update.matches("app-web"));
		assert!(!update.matches("sidecar"));

		let all = ResourceUpdate::new("*", Some("cpu=1"), None).unwrap();
		assert!(all.matches("sidecar"));
	}

	#[test]
	fn test_merge_keeps_existing_keys() {
		let update = ResourceUpdate::new("*", Some("memory=512Mi"), None).unwrap();
		let mut container = json!({"name": "app", "resources": {"limits": {"cpu": "100m"}}});
		let Value::Object(map) = &mut container else {
			unreachable!()
		};

		update.merge_into(map);
		assert_eq!(
			container,
			json!({"name": "app", "resources": {"limits": {"cpu": "100m", "memory": "512Mi"}}})
		);
	}
}
