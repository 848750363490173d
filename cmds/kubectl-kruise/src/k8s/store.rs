//! Object store the mutation pipeline reads from and writes to.

use kube::{
	api::{Api, DynamicObject, ListParams, Patch, PatchParams},
	core::TypeMeta,
	Client,
};
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

use super::{
	client::ClusterConnection,
	discovery::{ApiResourceCache, DiscoveryError, ResourceMapping},
	ResourceScope,
};

/// Errors returned by an [`ObjectStore`].
#[derive(Debug, Error)]
pub enum StoreError {
	#[error("not found")]
	NotFound,

	/// The object changed since it was read.
	#[error("the object has been modified; please apply your changes to the latest version and try again")]
	Conflict,

	#[error("{message}")]
	Rejected { code: u16, message: String },

	#[error("invalid patch")]
	InvalidPatch(#[source] serde_json::Error),

	#[error("failed to decode object")]
	Decode(#[source] serde_json::Error),

	#[error(transparent)]
	Transport(Box<kube::Error>),
}

impl StoreError {
	fn from_kube(err: kube::Error) -> Self {
		match err {
			kube::Error::Api(ref status) if status.code == 404 => Self::NotFound,
			kube::Error::Api(ref status) if status.code == 409 => Self::Conflict,
			kube::Error::Api(status) => Self::Rejected {
				code: status.code,
				message: status.message,
			},
			other => Self::Transport(Box::new(other)),
		}
	}
}

/// Read and patch access to resource instances.
///
/// Calls are awaited one at a time; implementations need no internal
/// concurrency.
#[allow(async_fn_in_trait)]
pub trait ObjectStore {
	/// Discovery information for the store's resource types.
	fn discovery(&self) -> &ApiResourceCache;

	/// Fetch a single object.
	async fn get(
		&self,
		mapping: &ResourceMapping,
		namespace: Option<&str>,
		name: &str,
	) -> Result<Value, StoreError>;

	/// List objects of a type, optionally filtered by a label selector.
	async fn list(
		&self,
		mapping: &ResourceMapping,
		namespace: Option<&str>,
		selector: Option<&str>,
	) -> Result<Vec<Value>, StoreError>;

	/// Apply a JSON merge patch and return the resulting object.
	///
	/// With `dry_run` the server computes the result without persisting it.
	async fn patch(
		&self,
		mapping: &ResourceMapping,
		namespace: Option<&str>,
		name: &str,
		patch: &[u8],
		dry_run: bool,
	) -> Result<Value, StoreError>;
}

/// [`ObjectStore`] backed by a live cluster.
#[derive(Clone)]
pub struct ClusterStore {
	client: Client,
	cache: ApiResourceCache,
}

impl ClusterStore {
	pub fn new(client: Client, cache: ApiResourceCache) -> Self {
		Self { client, cache }
	}

	/// Run discovery against the connected cluster.
	#[instrument(skip_all, fields(context = %conn.context()))]
	pub async fn discover(conn: &ClusterConnection) -> Result<Self, DiscoveryError> {
		let cache = ApiResourceCache::build(conn.client()).await?;
		Ok(Self::new(conn.client().clone(), cache))
	}

	fn dynamic_api(&self, mapping: &ResourceMapping, namespace: Option<&str>) -> Api<DynamicObject> {
		let ar = &mapping.api_resource;
		match (mapping.scope, namespace) {
			(ResourceScope::Namespaced, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, ar),
			_ => Api::all_with(self.client.clone(), ar),
		}
	}
}

/// Serialize an object, filling in type information list items lack.
fn object_to_value(mut obj: DynamicObject, mapping: &ResourceMapping) -> Result<Value, StoreError> {
	if obj.types.is_none() {
		obj.types = Some(TypeMeta {
			api_version: mapping.api_resource.api_version.clone(),
			kind: mapping.api_resource.kind.clone(),
		});
	}
	serde_json::to_value(obj).map_err(StoreError::Decode)
}

impl ObjectStore for ClusterStore {
	fn discovery(&self) -> &ApiResourceCache {
		&self.cache
	}

	#[instrument(skip(self, mapping), fields(resource = %mapping.resource_string()))]
	async fn get(
		&self,
		mapping: &ResourceMapping,
		namespace: Option<&str>,
		name: &str,
	) -> Result<Value, StoreError> {
		let obj = self
			.dynamic_api(mapping, namespace)
			.get(name)
			.await
			.map_err(StoreError::from_kube)?;
		object_to_value(obj, mapping)
	}

	#[instrument(skip(self, mapping), fields(resource = %mapping.resource_string()))]
	async fn list(
		&self,
		mapping: &ResourceMapping,
		namespace: Option<&str>,
		selector: Option<&str>,
	) -> Result<Vec<Value>, StoreError> {
		let mut params = ListParams::default();
		if let Some(selector) = selector {
			params = params.labels(selector);
		}

		let list = self
			.dynamic_api(mapping, namespace)
			.list(&params)
			.await
			.map_err(StoreError::from_kube)?;
		tracing::debug!(count = list.items.len(), "listed objects");

		list.items
			.into_iter()
			.map(|obj| object_to_value(obj, mapping))
			.collect()
	}

	#[instrument(skip(self, mapping, patch), fields(resource = %mapping.resource_string()))]
	async fn patch(
		&self,
		mapping: &ResourceMapping,
		namespace: Option<&str>,
		name: &str,
		patch: &[u8],
		dry_run: bool,
	) -> Result<Value, StoreError> {
		let body: Value = serde_json::from_slice(patch).map_err(StoreError::InvalidPatch)?;
		let params = PatchParams {
			dry_run,
			..Default::default()
		};

		let obj = self
			.dynamic_api(mapping, namespace)
			.patch(name, &params, &Patch::Merge(&body))
			.await
			.map_err(StoreError::from_kube)?;
		object_to_value(obj, mapping)
	}
}
