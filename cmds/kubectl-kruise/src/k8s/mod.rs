//! Kubernetes access for the lifecycle commands.
//!
//! Native API access through kube-rs: cluster connection, discovery of
//! resource types and their capabilities, and the object store the
//! mutation pipeline reads from and writes to.

pub mod client;
pub mod discovery;
pub mod selector;
pub mod store;

/// Kubernetes API resource scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceScope {
	/// Resource is namespaced (e.g., Deployment, CloneSet).
	Namespaced,

	/// Resource is cluster-wide (e.g., Namespace, ClusterRole).
	ClusterWide,
}

/// Namespace the command operates in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceScope {
	pub namespace: String,
	/// Set when the namespace was given explicitly; manifests naming a
	/// different namespace are then rejected instead of honored.
	pub enforce: bool,
}

impl NamespaceScope {
	pub fn new(namespace: impl Into<String>, enforce: bool) -> Self {
		Self {
			namespace: namespace.into(),
			enforce,
		}
	}
}

impl Default for NamespaceScope {
	fn default() -> Self {
		Self::new("default", false)
	}
}
