//! Kubernetes cluster connection management.

use std::{path::PathBuf, time::Duration};

use k8s_openapi::apimachinery::pkg::version::Info;
use kube::{
	config::{KubeConfigOptions, Kubeconfig, KubeconfigError},
	Client, Config,
};
use thiserror::Error;
use tracing::instrument;

use super::NamespaceScope;

/// Default timeout for Kubernetes API requests.
const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur when connecting to a Kubernetes cluster.
#[derive(Debug, Error)]
pub enum ConnectionError {
	#[error("context `{0}` was not found. Please check your $KUBECONFIG")]
	ContextNotFound(String),

	#[error("no current context is set. Pass --context or set current-context in your $KUBECONFIG")]
	NoCurrentContext,

	#[error(transparent)]
	Kubeconfig(#[from] KubeconfigError),

	#[error(transparent)]
	Kube(#[from] kube::Error),
}

/// How to reach the cluster, assembled once from flags and the config file.
#[derive(Debug, Clone, Default)]
pub struct ConnectionOptions {
	/// Explicit kubeconfig path; the default loading rules apply otherwise.
	pub kubeconfig: Option<PathBuf>,
	pub context: Option<String>,
	/// Namespace from `-n`. Enforced against manifests.
	pub namespace: Option<String>,
	/// Namespace from the config file. Used like a context namespace, never enforced.
	pub default_namespace: Option<String>,
	pub request_timeout: Option<Duration>,
}

impl ConnectionOptions {
	/// Read the kubeconfig these options point at.
	pub fn read_kubeconfig(&self) -> Result<Kubeconfig, ConnectionError> {
		let kubeconfig = match &self.kubeconfig {
			Some(path) => Kubeconfig::read_from(path)?,
			None => Kubeconfig::read()?,
		};
		Ok(kubeconfig)
	}

	/// Namespace scope for the run.
	///
	/// An explicit namespace is enforced. Otherwise the config file namespace or
	/// the namespace of the selected kubeconfig context is used, falling back to
	/// `default`.
	pub fn namespace_scope(&self, kubeconfig: Option<&Kubeconfig>) -> NamespaceScope {
		if let Some(ns) = &self.namespace {
			return NamespaceScope::new(ns.clone(), true);
		}
		if let Some(ns) = &self.default_namespace {
			return NamespaceScope::new(ns.clone(), false);
		}

		let context_name = self
			.context
			.clone()
			.or_else(|| kubeconfig.and_then(|k| k.current_context.clone()));

		let namespace = kubeconfig
			.zip(context_name)
			.and_then(|(k, name)| {
				k.contexts
					.iter()
					.find(|c| c.name == name)
					.and_then(|c| c.context.as_ref())
					.and_then(|c| c.namespace.clone())
			})
			.unwrap_or_else(|| "default".to_string());

		NamespaceScope::new(namespace, false)
	}
}

/// Represents a connection to a Kubernetes cluster.
#[derive(Clone)]
pub struct ClusterConnection {
	client: Client,
	server_version: Info,
	context: String,
}

impl std::fmt::Debug for ClusterConnection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ClusterConnection")
			.field("context", &self.context)
			.field("server_version", &self.server_version)
			.finish_non_exhaustive()
	}
}

impl ClusterConnection {
	/// Connect using an already loaded kubeconfig.
	///
	/// The context is `opts.context` when set, the kubeconfig's current context otherwise.
	#[instrument(skip_all)]
	pub async fn connect_with_kubeconfig(
		opts: &ConnectionOptions,
		kubeconfig: Kubeconfig,
	) -> Result<Self, ConnectionError> {
		let context = match &opts.context {
			Some(name) => {
				if !kubeconfig.contexts.iter().any(|c| &c.name == name) {
					return Err(ConnectionError::ContextNotFound(name.clone()));
				}
				name.clone()
			}
			None => kubeconfig
				.current_context
				.clone()
				.ok_or(ConnectionError::NoCurrentContext)?,
		};

		tracing::debug!(context = %context, "using kubeconfig context");

		let mut config = Config::from_custom_kubeconfig(
			kubeconfig,
			&KubeConfigOptions {
				context: Some(context.clone()),
				..Default::default()
			},
		)
		.await?;

		config.read_timeout = Some(opts.request_timeout.unwrap_or(DEFAULT_API_TIMEOUT));
		let client = Client::try_from(config)?;

		let server_version = client.apiserver_version().await?;
		tracing::debug!(
			server_version = %format!("{}.{}", server_version.major, server_version.minor),
			"connected to cluster"
		);

		Ok(Self {
			client,
			server_version,
			context,
		})
	}

	/// Get a reference to the underlying kube client.
	pub fn client(&self) -> &Client {
		&self.client
	}

	/// Name of the kubeconfig context in use.
	pub fn context(&self) -> &str {
		&self.context
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use kube::config::{Context, NamedContext};

	use super::*;

	fn kubeconfig_with_namespace(namespace: Option<&str>) -> Kubeconfig {
		Kubeconfig {
			contexts: vec![NamedContext {
				name: "ctx".to_string(),
				context: Some(Context {
					cluster: "cluster".to_string(),
					namespace: namespace.map(str::to_string),
					..Default::default()
				}),
			}],
			current_context: Some("ctx".to_string()),
			..Default::default()
		}
	}

	#[tokio::test]
	async fn test_connect_context_not_found() {
		let opts = ConnectionOptions {
			context: Some("nonexistent".to_string()),
			..Default::default()
		};

		let result = ClusterConnection::connect_with_kubeconfig(&opts, Kubeconfig::default()).await;
		assert_matches!(
			result,
			Err(ConnectionError::ContextNotFound(name)) if name == "nonexistent"
		);
	}

	#[tokio::test]
	async fn test_connect_without_current_context() {
		let result = ClusterConnection::connect_with_kubeconfig(
			&ConnectionOptions::default(),
			Kubeconfig::default(),
		)
		.await;
		assert_matches!(result, Err(ConnectionError::NoCurrentContext));
	}

	#[test]
	fn test_explicit_namespace_is_enforced() {
		let opts = ConnectionOptions {
			namespace: Some("prod".to_string()),
			..Default::default()
		};
		let kubeconfig = kubeconfig_with_namespace(Some("dev"));

		assert_eq!(
			opts.namespace_scope(Some(&kubeconfig)),
			NamespaceScope::new("prod", true)
		);
	}

	#[test]
	fn test_default_namespace_is_not_enforced() {
		let opts = ConnectionOptions {
			default_namespace: Some("staging".to_string()),
			..Default::default()
		};
		let kubeconfig = kubeconfig_with_namespace(Some("dev"));

		assert_eq!(
			opts.namespace_scope(Some(&kubeconfig)),
			NamespaceScope::new("staging", false)
		);
	}

	#[test]
	fn test_namespace_from_context() {
		let kubeconfig = kubeconfig_with_namespace(Some("dev"));

		assert_eq!(
			ConnectionOptions::default().namespace_scope(Some(&kubeconfig)),
			NamespaceScope::new("dev", false)
		);
	}

	#[test]
	fn test_namespace_defaults() {
		let kubeconfig = kubeconfig_with_namespace(None);

		assert_eq!(
			ConnectionOptions::default().namespace_scope(Some(&kubeconfig)),
			NamespaceScope::default()
		);
		assert_eq!(
			ConnectionOptions::default().namespace_scope(None),
			NamespaceScope::default()
		);
	}
}
