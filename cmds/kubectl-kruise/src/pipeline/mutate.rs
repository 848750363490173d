//! Per-kind lifecycle mutators.
//!
//! Which operation a kind supports, and where in the object it acts, is
//! described by a static [`WorkloadProfile`]. A lookup miss in the
//! [`MutatorRegistry`] is an unsupported kind.

use std::collections::HashMap;

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use super::requirements::{object_entry, ResourceUpdate};
use crate::k8s::discovery::KRUISE_GROUP;

/// Annotation touched on the pod template by a restart.
pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

#[derive(Debug, Error)]
pub enum MutateError {
	#[error("{operation} is not supported for {kind}")]
	UnsupportedKind { operation: &'static str, kind: String },

	#[error("unable to find container named {0}")]
	NoMatchingContainer(String),

	#[error("can't restart paused {0} (run rollout resume first)")]
	RestartPaused(String),

	#[error("object has no {0}")]
	MalformedObject(String),
}

/// Where a workload kind keeps the fields the operations touch.
#[derive(Debug, Clone, Copy)]
pub struct WorkloadProfile {
	pub group: &'static str,
	pub kind: &'static str,
	/// Path of the boolean suspension flag, for kinds that can pause.
	pub paused: Option<&'static [&'static str]>,
	/// Path of the pod template, for kinds that can restart.
	pub template: Option<&'static [&'static str]>,
	/// Whether a paused object refuses to restart.
	pub restart_requires_running: bool,
	/// Path of the pod spec, for kinds whose containers can be updated.
	pub pod_spec: Option<&'static [&'static str]>,
}

const TEMPLATE: &[&str] = &["spec", "template"];
const TEMPLATE_POD_SPEC: &[&str] = &["spec", "template", "spec"];

impl WorkloadProfile {
	const fn pod_template_owner(group: &'static str, kind: &'static str) -> Self {
		Self {
			group,
			kind,
			paused: None,
			template: None,
			restart_requires_running: false,
			pod_spec: Some(TEMPLATE_POD_SPEC),
		}
	}

	const fn restartable(mut self) -> Self {
		self.template = Some(TEMPLATE);
		self
	}

	const fn pausable(mut self, path: &'static [&'static str], restart_requires_running: bool) -> Self {
		self.paused = Some(path);
		self.restart_requires_running = restart_requires_running;
		self
	}
}

const BUILTIN_PROFILES: &[WorkloadProfile] = &[
	WorkloadProfile {
		pod_spec: Some(&["spec"]),
		..WorkloadProfile::pod_template_owner("", "Pod")
	},
	WorkloadProfile::pod_template_owner("", "ReplicationController"),
	WorkloadProfile::pod_template_owner("apps", "ReplicaSet"),
	WorkloadProfile::pod_template_owner("apps", "Deployment")
		.restartable()
		.pausable(&["spec", "paused"], true),
	WorkloadProfile::pod_template_owner("apps", "DaemonSet").restartable(),
	WorkloadProfile::pod_template_owner("apps", "StatefulSet").restartable(),
	WorkloadProfile::pod_template_owner("batch", "Job"),
	WorkloadProfile {
		pod_spec: Some(&["spec", "jobTemplate", "spec", "template", "spec"]),
		..WorkloadProfile::pod_template_owner("batch", "CronJob")
	},
	WorkloadProfile::pod_template_owner(KRUISE_GROUP, "CloneSet")
		.restartable()
		.pausable(&["spec", "updateStrategy", "paused"], true),
	WorkloadProfile::pod_template_owner(KRUISE_GROUP, "StatefulSet")
		.restartable()
		.pausable(&["spec", "updateStrategy", "rollingUpdate", "paused"], false),
	WorkloadProfile::pod_template_owner(KRUISE_GROUP, "DaemonSet").restartable(),
];

/// Profiles keyed by group and kind, across all versions.
///
/// Built once at startup and passed by reference.
#[derive(Debug, Clone)]
pub struct MutatorRegistry {
	profiles: HashMap<&'static str, HashMap<&'static str, WorkloadProfile>>,
}

impl MutatorRegistry {
	pub fn builtin() -> Self {
		Self::from_profiles(BUILTIN_PROFILES.iter().copied())
	}

	pub fn from_profiles(profiles: impl IntoIterator<Item = WorkloadProfile>) -> Self {
		let mut by_group: HashMap<_, HashMap<_, _>> = HashMap::new();
		for profile in profiles {
			by_group
				.entry(profile.group)
				.or_default()
				.insert(profile.kind, profile);
		}
		Self { profiles: by_group }
	}

	pub fn get(&self, group: &str, kind: &str) -> Option<&WorkloadProfile> {
		self.profiles.get(group)?.get(kind)
	}
}

impl Default for MutatorRegistry {
	fn default() -> Self {
		Self::builtin()
	}
}

/// Result of a successful mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
	Changed,
	/// The object already is in the desired state.
	Unchanged,
}

/// What an empty patch means for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyPatchPolicy {
	/// The object already satisfied the request; report it with this verb.
	Report(&'static str),
	/// The operation could not take effect; record a failure.
	Fail,
}

/// A lifecycle operation with its parameters.
#[derive(Debug, Clone)]
pub enum Operation {
	Pause,
	Resume,
	Restart,
	SetResources(ResourceUpdate),
}

impl Operation {
	pub fn name(&self) -> &'static str {
		match self {
			Self::Pause => "pause",
			Self::Resume => "resume",
			Self::Restart => "restart",
			Self::SetResources(_) => "set resources",
		}
	}

	/// Verb printed after a change.
	pub fn verb(&self) -> &'static str {
		match self {
			Self::Pause => "paused",
			Self::Resume => "resumed",
			Self::Restart => "restarted",
			Self::SetResources(_) => "resource requirements updated",
		}
	}

	pub fn empty_patch_policy(&self) -> EmptyPatchPolicy {
		match self {
			Self::Pause => EmptyPatchPolicy::Report("already paused"),
			Self::Resume => EmptyPatchPolicy::Report("already resumed"),
			Self::Restart | Self::SetResources(_) => EmptyPatchPolicy::Fail,
		}
	}

	/// Whether this operation selects every object of a bare `TYPE` argument.
	pub fn selects_all_of_bare_type(&self) -> bool {
		!matches!(self, Self::SetResources(_))
	}

	/// Mutate `object`, an instance of `group`/`kind`, in place.
	pub fn mutate(
		&self,
		registry: &MutatorRegistry,
		group: &str,
		kind: &str,
		object: &mut Value,
	) -> Result<Mutation, MutateError> {
		let unsupported = || MutateError::UnsupportedKind {
			operation: self.name(),
			kind: qualified_kind(group, kind),
		};
		let profile = registry.get(group, kind).ok_or_else(unsupported)?;

		match self {
			Self::Pause | Self::Resume => {
				let path = profile.paused.ok_or_else(unsupported)?;
				set_paused(object, path, matches!(self, Self::Pause))
			}
			Self::Restart => {
				let template = profile.template.ok_or_else(unsupported)?;
				if profile.restart_requires_running && is_paused(object, profile) {
					return Err(MutateError::RestartPaused(kind.to_lowercase()));
				}
				restart(object, template)
			}
			Self::SetResources(update) => {
				let pod_spec = profile.pod_spec.ok_or_else(unsupported)?;
				set_resources(object, pod_spec, update)
			}
		}
	}
}

fn qualified_kind(group: &str, kind: &str) -> String {
	if group.is_empty() {
		kind.to_string()
	} else {
		format!("{kind}.{group}")
	}
}

fn lookup<'a>(object: &'a Value, path: &[&str]) -> Option<&'a Value> {
	path.iter().try_fold(object, |value, key| value.get(key))
}

/// Walk `path`, creating missing objects along the way.
fn ensure_path<'a>(object: &'a mut Value, path: &[&str]) -> Result<&'a mut Map<String, Value>, MutateError> {
	let mut current = match object {
		Value::Object(map) => map,
		_ => return Err(MutateError::MalformedObject("object body".to_string())),
	};
	for key in path {
		current = object_entry(current, key);
	}
	Ok(current)
}

fn is_paused(object: &Value, profile: &WorkloadProfile) -> bool {
	profile
		.paused
		.and_then(|path| lookup(object, path))
		.and_then(Value::as_bool)
		.unwrap_or(false)
}

fn set_paused(object: &mut Value, path: &[&str], paused: bool) -> Result<Mutation, MutateError> {
	let current = lookup(object, path).and_then(Value::as_bool).unwrap_or(false);
	if current == paused {
		return Ok(Mutation::Unchanged);
	}

	let Some((field, parent)) = path.split_last() else {
		return Err(MutateError::MalformedObject("pause field".to_string()));
	};
	ensure_path(object, parent)?.insert(field.to_string(), Value::Bool(paused));
	Ok(Mutation::Changed)
}

fn restart(object: &mut Value, template: &[&str]) -> Result<Mutation, MutateError> {
	if lookup(object, template).is_none() {
		return Err(MutateError::MalformedObject(format!(".{}", template.join("."))));
	}

	let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
	let annotations = object_entry(object_entry(ensure_path(object, template)?, "metadata"), "annotations");
	annotations.insert(RESTARTED_AT_ANNOTATION.to_string(), Value::String(timestamp));
	Ok(Mutation::Changed)
}

fn set_resources(object: &mut Value, pod_spec: &[&str], update: &ResourceUpdate) -> Result<Mutation, MutateError> {
	let containers = ensure_path(object, pod_spec)?
		.get_mut("containers")
		.and_then(Value::as_array_mut)
		.ok_or_else(|| MutateError::MalformedObject("containers".to_string()))?;

	let mut matched = 0;
	for container in containers.iter_mut().filter_map(Value::as_object_mut) {
		let name = container.get("name").and_then(Value::as_str).unwrap_or_default();
		if update.matches(name) {
			update.merge_into(container);
			matched += 1;
		}
	}

	if matched == 0 {
		return Err(MutateError::NoMatchingContainer(update.selector().to_string()));
	}
	Ok(Mutation::Changed)
}
