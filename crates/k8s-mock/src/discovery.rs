//! Mock Kubernetes API discovery types.

use std::collections::BTreeMap;

/// Discovery mode for the mock server.
#[derive(Clone, Copy, Default)]
pub enum DiscoveryMode {
	/// Support aggregated discovery (APIGroupDiscoveryList).
	#[default]
	Aggregated,
	/// Return 406 for aggregated discovery, forcing fallback to legacy endpoints.
	Legacy,
}

/// Pre-configured discovery responses.
///
/// `group_resources` is keyed by `group/version`.
#[derive(Clone)]
pub struct MockDiscovery {
	pub core_resources: Vec<MockApiResource>,
	pub group_resources: BTreeMap<String, Vec<MockApiResource>>,
}

impl Default for MockDiscovery {
	fn default() -> Self {
		Self {
			core_resources: vec![
				MockApiResource::namespaced("configmaps", "ConfigMap"),
				MockApiResource::namespaced("pods", "Pod"),
				MockApiResource::namespaced("replicationcontrollers", "ReplicationController"),
				MockApiResource::cluster_scoped("namespaces", "Namespace"),
			],
			group_resources: BTreeMap::from([
				(
					"apps/v1".to_string(),
					vec![
						MockApiResource::namespaced("deployments", "Deployment"),
						MockApiResource::namespaced("statefulsets", "StatefulSet"),
						MockApiResource::namespaced("daemonsets", "DaemonSet"),
						MockApiResource::namespaced("replicasets", "ReplicaSet"),
					],
				),
				(
					"batch/v1".to_string(),
					vec![
						MockApiResource::namespaced("jobs", "Job"),
						MockApiResource::namespaced("cronjobs", "CronJob"),
					],
				),
				(
					"apps.kruise.io/v1alpha1".to_string(),
					vec![
						MockApiResource::namespaced("clonesets", "CloneSet"),
						MockApiResource::namespaced("daemonsets", "DaemonSet"),
					],
				),
				(
					"apps.kruise.io/v1beta1".to_string(),
					vec![MockApiResource::namespaced("statefulsets", "StatefulSet")],
				),
			]),
		}
	}
}

impl MockDiscovery {
	/// Register a resource under `group/version`, replacing one of the same kind.
	pub fn with_resource(mut self, group_version: &str, resource: MockApiResource) -> Self {
		let resources = if group_version.contains('/') {
			self.group_resources
				.entry(group_version.to_string())
				.or_default()
		} else {
			&mut self.core_resources
		};
		resources.retain(|r| r.kind != resource.kind);
		resources.push(resource);
		self
	}

	/// Find the resource definition serving `kind` in `api_version`.
	pub fn find(&self, api_version: &str, kind: &str) -> Option<&MockApiResource> {
		if api_version.contains('/') {
			self.group_resources
				.get(api_version)?
				.iter()
				.find(|r| r.kind == kind)
		} else {
			self.core_resources.iter().find(|r| r.kind == kind)
		}
	}

	/// Group versions by group name, most preferred version first.
	pub(crate) fn groups(&self) -> BTreeMap<&str, Vec<(&str, &[MockApiResource])>> {
		let mut groups: BTreeMap<&str, Vec<(&str, &[MockApiResource])>> = BTreeMap::new();
		for (gv, resources) in &self.group_resources {
			let (group, version) = gv.split_once('/').unwrap_or(("", gv.as_str()));
			groups
				.entry(group)
				.or_default()
				.push((version, resources.as_slice()));
		}
		for versions in groups.values_mut() {
			versions.sort_by_key(|(version, _)| std::cmp::Reverse(version_rank(version)));
		}
		groups
	}
}

/// Rank a Kubernetes API version: GA beats beta beats alpha, higher numbers win.
fn version_rank(version: &str) -> (u8, u32, u32) {
	let Some(rest) = version.strip_prefix('v') else {
		return (0, 0, 0);
	};
	let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
	let major = digits.parse().unwrap_or(0);
	let tail = &rest[digits.len()..];
	let (stability, minor) = if tail.is_empty() {
		(3, 0)
	} else if let Some(n) = tail.strip_prefix("beta") {
		(2, n.parse().unwrap_or(0))
	} else if let Some(n) = tail.strip_prefix("alpha") {
		(1, n.parse().unwrap_or(0))
	} else {
		(0, 0)
	};
	(stability, major, minor)
}

/// A mock API resource definition.
#[derive(Clone)]
pub struct MockApiResource {
	pub name: String,
	pub kind: String,
	pub namespaced: bool,
	pub verbs: Vec<String>,
}

impl MockApiResource {
	pub fn namespaced(name: &str, kind: &str) -> Self {
		Self {
			name: name.to_string(),
			kind: kind.to_string(),
			namespaced: true,
			verbs: all_verbs(),
		}
	}

	pub fn cluster_scoped(name: &str, kind: &str) -> Self {
		Self {
			name: name.to_string(),
			kind: kind.to_string(),
			namespaced: false,
			verbs: all_verbs(),
		}
	}

	/// A namespaced resource that cannot be patched (no server-side dry run either).
	pub fn read_only(name: &str, kind: &str) -> Self {
		Self {
			name: name.to_string(),
			kind: kind.to_string(),
			namespaced: true,
			verbs: vec!["get".into(), "list".into(), "watch".into()],
		}
	}
}

fn all_verbs() -> Vec<String> {
	vec![
		"create".into(),
		"delete".into(),
		"get".into(),
		"list".into(),
		"patch".into(),
		"update".into(),
		"watch".into(),
	]
}
