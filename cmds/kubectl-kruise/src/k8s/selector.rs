//! Label selector parsing and matching.
//!
//! Parses the `-l` syntax into kube's [`Selector`] so objects that never came
//! from a LIST call (manifests, pods owned by a workload) can be filtered
//! locally.

use std::{
	collections::{BTreeMap, BTreeSet},
	sync::LazyLock,
};

use kube::core::{Expression, Selector, SelectorExt};
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unable to parse requirement \"{0}\"")]
pub struct SelectorError(pub String);

const KEY: &str = r"[A-Za-z0-9](?:[-A-Za-z0-9_./]*[A-Za-z0-9])?";
const VALUE: &str = r"(?:[A-Za-z0-9](?:[-A-Za-z0-9_.]*[A-Za-z0-9])?)?";

static SET_REQUIREMENT: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(&format!(r"^(?P<key>{KEY})\s+(?P<op>in|notin)\s*\((?P<values>[^()]*)\)$"))
		.expect("set requirement regex is valid")
});

static EQUALITY_REQUIREMENT: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(&format!(r"^(?P<key>{KEY})\s*(?P<op>!=|==|=)\s*(?P<value>{VALUE})$"))
		.expect("equality requirement regex is valid")
});

static EXISTENCE_REQUIREMENT: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(&format!(r"^(?P<not>!)?\s*(?P<key>{KEY})$")).expect("existence regex is valid")
});

static SET_VALUE: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(&format!("^{VALUE}$")).expect("value regex is valid"));

/// Parse a label selector such as `app=web,tier!=cache,env in (prod,staging),!legacy`.
///
/// An empty selector selects everything.
pub fn parse_selector(input: &str) -> Result<Selector, SelectorError> {
	split_requirements(input)
		.into_iter()
		.map(str::trim)
		.filter(|req| !req.is_empty())
		.map(parse_requirement)
		.collect()
}

/// Split on commas outside of `( )` value sets.
fn split_requirements(input: &str) -> Vec<&str> {
	let mut parts = Vec::new();
	let mut depth = 0usize;
	let mut start = 0;
	for (i, c) in input.char_indices() {
		match c {
			'(' => depth += 1,
			')' => depth = depth.saturating_sub(1),
			',' if depth == 0 => {
				parts.push(&input[start..i]);
				start = i + 1;
			}
			_ => {}
		}
	}
	parts.push(&input[start..]);
	parts
}

fn parse_requirement(req: &str) -> Result<Expression, SelectorError> {
	let invalid = || SelectorError(req.to_string());

	if let Some(caps) = SET_REQUIREMENT.captures(req) {
		let key = caps["key"].to_string();
		let values = caps["values"]
			.split(',')
			.map(str::trim)
			.map(|value| {
				SET_VALUE
					.is_match(value)
					.then(|| value.to_string())
					.ok_or_else(invalid)
			})
			.collect::<Result<BTreeSet<_>, _>>()?;
		return Ok(match &caps["op"] {
			"in" => Expression::In(key, values),
			_ => Expression::NotIn(key, values),
		});
	}

	if let Some(caps) = EQUALITY_REQUIREMENT.captures(req) {
		let (key, value) = (caps["key"].to_string(), caps["value"].to_string());
		return Ok(match &caps["op"] {
			"!=" => Expression::NotEqual(key, value),
			_ => Expression::Equal(key, value),
		});
	}

	let caps = EXISTENCE_REQUIREMENT.captures(req).ok_or_else(invalid)?;
	let key = caps["key"].to_string();
	Ok(if caps.name("not").is_some() {
		Expression::DoesNotExist(key)
	} else {
		Expression::Exists(key)
	})
}

/// `metadata.labels` of an object. Non-string values are ignored.
pub fn object_labels(object: &Value) -> BTreeMap<String, String> {
	object
		.pointer("/metadata/labels")
		.and_then(Value::as_object)
		.map(|labels| {
			labels
				.iter()
				.filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
				.collect()
		})
		.unwrap_or_default()
}

/// Whether `object` carries labels selected by `selector`.
pub fn selects(selector: &Selector, object: &Value) -> bool {
	selector.matches(&object_labels(object))
}

#[cfg(test)]
mod tests {
	use rstest::rstest;
	use serde_json::json;

	use super::*;

	fn web() -> Value {
		json!({"metadata": {"labels": {"app": "web", "tier": "front", "replicas": 3}}})
	}

	#[rstest]
	#[case("", true)]
	#[case("app=web", true)]
	#[case("app==web,tier", true)]
	#[case("app!=db", true)]
	#[case("!missing", true)]
	#[case("app in (web, api)", true)]
	#[case("tier notin (back),app", true)]
	#[case("app=db", false)]
	#[case("tier,!app", false)]
	#[case("app notin (web)", false)]
	#[case("replicas", false)]
	fn test_selector_matching(#[case] selector: &str, #[case] selected: bool) {
		let selector = parse_selector(selector).unwrap();
		assert_eq!(selects(&selector, &web()), selected);
	}

	#[rstest]
	#[case("app=web=x")]
	#[case("app in web")]
	#[case("=web")]
	#[case("app in (we b)")]
	fn test_invalid_selector(#[case] selector: &str) {
		assert!(parse_selector(selector).is_err());
	}

	#[test]
	fn test_selector_round_trips_to_query_string() {
		let selector = parse_selector("app=web,tier!=cache").unwrap();
		assert_eq!(selector.to_string(), "app=web,tier!=cache");
	}
}
