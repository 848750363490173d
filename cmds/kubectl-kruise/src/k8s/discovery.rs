//! Kubernetes API resource discovery and caching.
//!
//! Discovery runs once per command. The cache answers two questions: which
//! API resource a manifest's apiVersion/kind maps to, and which resource a
//! user-typed token such as `cs`, `deployment` or `clonesets.apps.kruise.io`
//! names.

use std::collections::HashMap;

use kube::{
	core::GroupVersionKind,
	discovery::{verbs, ApiCapabilities, ApiResource, Scope},
	Client, Discovery,
};
use thiserror::Error;
use tracing::instrument;

use super::ResourceScope;

/// Group serving the OpenKruise workloads.
pub const KRUISE_GROUP: &str = "apps.kruise.io";

/// Errors that can occur during API resource discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
	#[error("full API discovery failed")]
	FullDiscovery(#[source] kube::Error),

	#[error("the server doesn't have a resource type \"{0}\"")]
	UnknownType(String),

	#[error("no matches for kind \"{kind}\" in version \"{api_version}\"")]
	UnknownKind { api_version: String, kind: String },

	#[error("object is missing apiVersion or kind")]
	MissingTypeInfo,
}

/// Short names and aliases accepted on the command line.
///
/// Maps to the plural resource name and, where the alias is group specific,
/// the group it pins.
const ALIASES: &[(&str, &str, Option<&str>)] = &[
	("po", "pods", None),
	("rc", "replicationcontrollers", None),
	("deploy", "deployments", None),
	("rs", "replicasets", None),
	("sts", "statefulsets", None),
	("ds", "daemonsets", None),
	("cj", "cronjobs", None),
	("cs", "clonesets", Some(KRUISE_GROUP)),
	("asts", "statefulsets", Some(KRUISE_GROUP)),
	("advancedstatefulset", "statefulsets", Some(KRUISE_GROUP)),
	("advancedstatefulsets", "statefulsets", Some(KRUISE_GROUP)),
	("ads", "daemonsets", Some(KRUISE_GROUP)),
	("advanceddaemonset", "daemonsets", Some(KRUISE_GROUP)),
	("advanceddaemonsets", "daemonsets", Some(KRUISE_GROUP)),
];

/// Extract a GroupVersionKind from a Kubernetes manifest.
pub fn gvk_from_manifest(manifest: &serde_json::Value) -> Option<GroupVersionKind> {
	let api_version = manifest.get("apiVersion")?.as_str()?;
	let kind = manifest.get("kind")?.as_str()?;
	Some(gvk_from_api_version(api_version, kind))
}

/// Create a GroupVersionKind from an apiVersion string and kind.
pub fn gvk_from_api_version(api_version: &str, kind: &str) -> GroupVersionKind {
	let (group, version) = match api_version.split_once('/') {
		Some((g, v)) => (g, v),
		None => ("", api_version),
	};
	GroupVersionKind::gvk(group, version, kind)
}

/// Groups served by Kubernetes itself. These win when a bare type is ambiguous.
fn is_builtin_group(group: &str) -> bool {
	!group.contains('.') || group.ends_with(".k8s.io")
}

/// A discovered API resource with scope and verbs.
#[derive(Debug, Clone)]
pub struct ResourceMapping {
	/// The kube ApiResource for making API calls.
	pub api_resource: ApiResource,
	/// Whether this resource is namespaced or cluster-wide.
	pub scope: ResourceScope,
	/// Verbs the server accepts for this resource.
	pub verbs: Vec<String>,
	/// Whether this version is the preferred version of its group.
	pub preferred: bool,
}

impl ResourceMapping {
	pub fn new(api_resource: ApiResource, scope: ResourceScope, verbs: Vec<String>) -> Self {
		Self {
			api_resource,
			scope,
			verbs,
			preferred: true,
		}
	}

	/// Mapping for objects handled without a cluster.
	///
	/// The plural is guessed from the kind and no verbs are known.
	pub fn from_gvk_guess(gvk: &GroupVersionKind) -> Self {
		Self::new(ApiResource::from_gvk(gvk), ResourceScope::Namespaced, Vec::new())
	}

	fn from_capabilities(api_resource: ApiResource, caps: &ApiCapabilities, preferred: bool) -> Self {
		let scope = match caps.scope {
			Scope::Namespaced => ResourceScope::Namespaced,
			Scope::Cluster => ResourceScope::ClusterWide,
		};
		Self {
			api_resource,
			scope,
			verbs: caps.operations.clone(),
			preferred,
		}
	}

	pub fn gvk(&self) -> GroupVersionKind {
		let ar = &self.api_resource;
		GroupVersionKind::gvk(&ar.group, &ar.version, &ar.kind)
	}

	pub fn supports(&self, verb: &str) -> bool {
		self.verbs.iter().any(|v| v == verb)
	}

	/// `plural[.group]`, the form used in error messages.
	pub fn resource_string(&self) -> String {
		let ar = &self.api_resource;
		if ar.group.is_empty() {
			ar.plural.clone()
		} else {
			format!("{}.{}", ar.plural, ar.group)
		}
	}

	/// `kind[.group]` lowercased, the form used when printing object names.
	pub fn kind_string(&self) -> String {
		let ar = &self.api_resource;
		let kind = ar.kind.to_lowercase();
		if ar.group.is_empty() {
			kind
		} else {
			format!("{kind}.{}", ar.group)
		}
	}
}

/// Cached API resource discovery results.
#[derive(Debug, Clone, Default)]
pub struct ApiResourceCache {
	resources: HashMap<GroupVersionKind, ResourceMapping>,
}

impl ApiResourceCache {
	/// Build the cache by querying the cluster's discovery API.
	///
	/// Uses the Aggregated Discovery API (K8s 1.26+) when available and falls
	/// back to per-group discovery on older clusters.
	#[instrument(skip_all)]
	pub async fn build(client: &Client) -> Result<Self, DiscoveryError> {
		match Discovery::new(client.clone()).run_aggregated().await {
			Ok(discovery) => {
				tracing::debug!("using aggregated discovery");
				Ok(Self::from_discovery(discovery))
			}
			Err(e) => {
				tracing::debug!(error = %e, "aggregated discovery not available");
				let discovery = Discovery::new(client.clone())
					.run()
					.await
					.map_err(DiscoveryError::FullDiscovery)?;
				Ok(Self::from_discovery(discovery))
			}
		}
	}

	fn from_discovery(discovery: Discovery) -> Self {
		let mut resources = HashMap::new();

		for group in discovery.groups() {
			let preferred_version = group.preferred_version_or_latest().to_string();
			for ver in group.versions() {
				for (ar, caps) in group.versioned_resources(ver) {
					let mapping = ResourceMapping::from_capabilities(ar, &caps, ver == preferred_version);
					resources.insert(mapping.gvk(), mapping);
				}
			}
		}

		tracing::debug!(resources = resources.len(), "discovery cache built");
		Self { resources }
	}

	/// Build a cache from known mappings.
	pub fn from_mappings(mappings: impl IntoIterator<Item = ResourceMapping>) -> Self {
		Self {
			resources: mappings.into_iter().map(|m| (m.gvk(), m)).collect(),
		}
	}

	/// Look up a resource by its GroupVersionKind.
	pub fn lookup(&self, gvk: &GroupVersionKind) -> Option<&ResourceMapping> {
		self.resources.get(gvk)
	}

	/// Look up the mapping for a manifest's apiVersion and kind.
	pub fn lookup_manifest(&self, manifest: &serde_json::Value) -> Result<&ResourceMapping, DiscoveryError> {
		let gvk = gvk_from_manifest(manifest).ok_or(DiscoveryError::MissingTypeInfo)?;
		self.lookup(&gvk).ok_or_else(|| DiscoveryError::UnknownKind {
			api_version: gvk.api_version(),
			kind: gvk.kind.clone(),
		})
	}

	/// Resolve a resource type typed by the user.
	///
	/// Accepts singular or plural names, kinds, short names and
	/// `resource.group` qualified forms. When several groups serve the same
	/// name, built-in groups win, then the alphabetically first group. Within
	/// a group the preferred version wins.
	pub fn resolve_type(&self, token: &str) -> Result<&ResourceMapping, DiscoveryError> {
		let lowered = token.to_lowercase();
		let (name, group) = match ALIASES.iter().find(|(alias, _, _)| *alias == lowered) {
			Some((_, plural, group)) => (plural.to_string(), group.map(str::to_string)),
			None => match lowered.split_once('.') {
				Some((name, group)) => (name.to_string(), Some(group.to_string())),
				None => (lowered.clone(), None),
			},
		};

		let mut candidates: Vec<&ResourceMapping> = self
			.resources
			.values()
			.filter(|m| {
				let ar = &m.api_resource;
				ar.plural == name || ar.kind.to_lowercase() == name
			})
			.filter(|m| group.as_deref().is_none_or(|g| m.api_resource.group == g))
			.collect();

		candidates.sort_by(|a, b| {
			let (ga, gb) = (&a.api_resource.group, &b.api_resource.group);
			is_builtin_group(gb)
				.cmp(&is_builtin_group(ga))
				.then_with(|| ga.cmp(gb))
				.then_with(|| b.preferred.cmp(&a.preferred))
				.then_with(|| b.api_resource.version.cmp(&a.api_resource.version))
		});

		candidates
			.first()
			.copied()
			.ok_or_else(|| DiscoveryError::UnknownType(token.to_string()))
	}

	/// Whether the server accepts patches, and therefore server side dry run,
	/// for this resource.
	pub fn supports_dry_run(&self, gvk: &GroupVersionKind) -> bool {
		self.lookup(gvk).is_some_and(|m| m.supports(verbs::PATCH))
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use rstest::rstest;

	use super::*;

	fn mapping(group: &str, version: &str, kind: &str, plural: &str, verbs: &[&str]) -> ResourceMapping {
		let gvk = GroupVersionKind::gvk(group, version, kind);
		ResourceMapping::new(
			ApiResource::from_gvk_with_plural(&gvk, plural),
			ResourceScope::Namespaced,
			verbs.iter().map(|v| v.to_string()).collect(),
		)
	}

	fn cache() -> ApiResourceCache {
		let all = &["get", "list", "patch"];
		let mut cloneset = mapping(KRUISE_GROUP, "v1alpha1", "CloneSet", "clonesets", all);
		cloneset.preferred = false;
		let mut old_asts = mapping(KRUISE_GROUP, "v1alpha1", "StatefulSet", "statefulsets", all);
		old_asts.preferred = false;
		ApiResourceCache::from_mappings([
			mapping("", "v1", "Pod", "pods", all),
			mapping("apps", "v1", "Deployment", "deployments", all),
			mapping("apps", "v1", "StatefulSet", "statefulsets", all),
			mapping("apps", "v1", "DaemonSet", "daemonsets", all),
			mapping("batch", "v1", "CronJob", "cronjobs", &["get", "list"]),
			cloneset,
			mapping(KRUISE_GROUP, "v1alpha1", "DaemonSet", "daemonsets", all),
			mapping(KRUISE_GROUP, "v1beta1", "StatefulSet", "statefulsets", all),
			old_asts,
		])
	}

	#[test]
	fn test_gvk_from_manifest() {
		let manifest = serde_json::json!({
			"apiVersion": "apps.kruise.io/v1alpha1",
			"kind": "CloneSet",
			"metadata": {
				"name": "test"
			}
		});

		let gvk = gvk_from_manifest(&manifest).unwrap();
		assert_eq!(gvk.group, "apps.kruise.io");
		assert_eq!(gvk.version, "v1alpha1");
		assert_eq!(gvk.kind, "CloneSet");
	}

	#[test]
	fn test_gvk_from_manifest_core_api() {
		let manifest = serde_json::json!({"apiVersion": "v1", "kind": "Pod"});

		let gvk = gvk_from_manifest(&manifest).unwrap();
		assert_eq!(gvk.group, "");
		assert_eq!(gvk.api_version(), "v1");
	}

	#[test]
	fn test_gvk_from_manifest_missing_fields() {
		let manifest = serde_json::json!({"kind": "Deployment"});
		assert!(gvk_from_manifest(&manifest).is_none());
	}

	#[rstest]
	#[case("deployment", "apps", "Deployment")]
	#[case("deployments", "apps", "Deployment")]
	#[case("deploy", "apps", "Deployment")]
	#[case("Deployment", "apps", "Deployment")]
	#[case("cs", KRUISE_GROUP, "CloneSet")]
	#[case("cloneset", KRUISE_GROUP, "CloneSet")]
	#[case("clonesets.apps.kruise.io", KRUISE_GROUP, "CloneSet")]
	#[case("statefulset", "apps", "StatefulSet")]
	#[case("sts", "apps", "StatefulSet")]
	#[case("statefulsets.apps.kruise.io", KRUISE_GROUP, "StatefulSet")]
	#[case("asts", KRUISE_GROUP, "StatefulSet")]
	#[case("advancedstatefulset", KRUISE_GROUP, "StatefulSet")]
	#[case("daemonset", "apps", "DaemonSet")]
	#[case("ads", KRUISE_GROUP, "DaemonSet")]
	#[case("po", "", "Pod")]
	fn test_resolve_type(#[case] token: &str, #[case] group: &str, #[case] kind: &str) {
		let cache = cache();
		let mapping = cache.resolve_type(token).unwrap();
		assert_eq!(mapping.api_resource.group, group);
		assert_eq!(mapping.api_resource.kind, kind);
	}

	#[test]
	fn test_resolve_type_prefers_preferred_version() {
		let cache = cache();
		let mapping = cache.resolve_type("asts").unwrap();
		assert_eq!(mapping.api_resource.version, "v1beta1");
	}

	#[test]
	fn test_resolve_unknown_type() {
		assert_matches!(
			cache().resolve_type("widgets"),
			Err(DiscoveryError::UnknownType(t)) if t == "widgets"
		);
	}

	#[test]
	fn test_supports_dry_run() {
		let cache = cache();
		assert!(cache.supports_dry_run(&GroupVersionKind::gvk("apps", "v1", "Deployment")));
		assert!(!cache.supports_dry_run(&GroupVersionKind::gvk("batch", "v1", "CronJob")));
		assert!(!cache.supports_dry_run(&GroupVersionKind::gvk("apps", "v1", "Unknown")));
	}

	#[test]
	fn test_resource_and_kind_strings() {
		let cache = cache();
		let cloneset = cache.resolve_type("cs").unwrap();
		assert_eq!(cloneset.resource_string(), "clonesets.apps.kruise.io");
		assert_eq!(cloneset.kind_string(), "cloneset.apps.kruise.io");

		let pod = cache.resolve_type("pod").unwrap();
		assert_eq!(pod.resource_string(), "pods");
		assert_eq!(pod.kind_string(), "pod");
	}
}
