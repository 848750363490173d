//! HTTP-based mock Kubernetes server using wiremock.
//!
//! This provides a real HTTP server that can be used with actual kubeconfig-based
//! connections, unlike the tower mock which only works with in-process clients.

use std::{
	collections::HashMap,
	sync::{Arc, RwLock},
};

use bon::Builder;
use kube::config::{
	AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};
use serde_json::Value;
use tracing::{debug, trace};
use wiremock::{
	matchers::{header_regex, method, path, path_regex},
	Mock, MockServer, Request, ResponseTemplate,
};

use super::{
	discovery::{DiscoveryMode, MockDiscovery},
	helpers::{
		merge_patch, next_resource_version, resource_version, selector_matches,
		set_resource_version,
	},
};

/// Type alias for the shared mutable resources map, keyed by `(collection path, name)`.
pub type SharedResources = Arc<RwLock<HashMap<(String, String), Value>>>;

/// A mock Kubernetes server exposed over HTTP.
#[derive(Builder)]
pub struct HttpMockK8sServer {
	#[builder(default)]
	discovery_mode: DiscoveryMode,
	/// API resources advertised through discovery.
	#[builder(default)]
	discovery: MockDiscovery,
	/// Resources to serve as raw manifests. The server derives API paths from
	/// apiVersion/kind using the discovery data.
	#[builder(default)]
	resources: Vec<Value>,
}

/// A PATCH request received by the mock server.
#[derive(Debug, Clone)]
pub struct RecordedPatch {
	/// Full request path, e.g. `/apis/apps/v1/namespaces/default/deployments/web`.
	pub path: String,
	pub content_type: Option<String>,
	pub body: Value,
	pub dry_run: bool,
}

/// A running HTTP mock server instance.
pub struct RunningHttpMockK8sServer {
	server: MockServer,
	discovery: MockDiscovery,
	resources: SharedResources,
}

impl HttpMockK8sServer {
	/// Start the mock server with all configured resources.
	pub async fn start(self) -> RunningHttpMockK8sServer {
		let server = MockServer::start().await;

		debug!(uri = %server.uri(), "Started mock K8s server");

		let mut resources: HashMap<(String, String), Value> = HashMap::new();

		for mut manifest in self.resources {
			if let Some(key) = api_path_for_manifest(&manifest, &self.discovery) {
				if resource_version(&manifest).is_none() {
					set_resource_version(&mut manifest, 1);
				}
				trace!(api_path = %key.0, name = %key.1, "Registered resource");
				resources.insert(key, manifest);
			}
		}

		let ns_key = ("/api/v1/namespaces".to_string(), "default".to_string());
		resources.entry(ns_key).or_insert_with(|| {
			serde_json::json!({
				"apiVersion": "v1",
				"kind": "Namespace",
				"metadata": {
					"name": "default",
					"resourceVersion": "1"
				}
			})
		});

		let shared_resources = Arc::new(RwLock::new(resources));

		mount_version(&server).await;
		mount_discovery(&server, &self.discovery, self.discovery_mode).await;
		mount_resources(&server, &shared_resources).await;

		RunningHttpMockK8sServer {
			server,
			discovery: self.discovery,
			resources: shared_resources,
		}
	}
}

/// Derive the collection path and name for a manifest using discovery data.
fn api_path_for_manifest(manifest: &Value, discovery: &MockDiscovery) -> Option<(String, String)> {
	let api_version = manifest.get("apiVersion")?.as_str()?;
	let kind = manifest.get("kind")?.as_str()?;
	let name = manifest.pointer("/metadata/name")?.as_str()?.to_string();
	let namespace = manifest
		.pointer("/metadata/namespace")
		.and_then(Value::as_str);

	let resource = discovery.find(api_version, kind)?;
	let prefix = if api_version.contains('/') {
		"/apis"
	} else {
		"/api"
	};

	let path = if resource.namespaced {
		let ns = namespace.unwrap_or("default");
		format!(
			"{}/{}/namespaces/{}/{}",
			prefix, api_version, ns, resource.name
		)
	} else {
		format!("{}/{}/{}", prefix, api_version, resource.name)
	};

	Some((path, name))
}

impl RunningHttpMockK8sServer {
	/// Get the server's URI (e.g., "http://127.0.0.1:12345").
	pub fn uri(&self) -> String {
		self.server.uri()
	}

	/// Create a Kubeconfig pointing to this mock server.
	pub fn kubeconfig(&self) -> Kubeconfig {
		self.kubeconfig_with_context("mock-context")
	}

	/// Create a Kubeconfig pointing to this mock server with a custom context name.
	pub fn kubeconfig_with_context(&self, context_name: &str) -> Kubeconfig {
		let cluster_name = "mock-cluster";
		let user_name = "mock-user";

		Kubeconfig {
			clusters: vec![NamedCluster {
				name: cluster_name.to_string(),
				cluster: Some(Cluster {
					server: Some(self.uri()),
					insecure_skip_tls_verify: Some(true),
					..Default::default()
				}),
			}],
			contexts: vec![NamedContext {
				name: context_name.to_string(),
				context: Some(Context {
					cluster: cluster_name.to_string(),
					user: Some(user_name.to_string()),
					namespace: Some("default".to_string()),
					..Default::default()
				}),
			}],
			auth_infos: vec![NamedAuthInfo {
				name: user_name.to_string(),
				auth_info: Some(AuthInfo::default()),
			}],
			current_context: Some(context_name.to_string()),
			..Default::default()
		}
	}

	/// Current stored state of an object, if the server knows it.
	pub fn resource(
		&self,
		api_version: &str,
		kind: &str,
		namespace: &str,
		name: &str,
	) -> Option<Value> {
		let lookup = serde_json::json!({
			"apiVersion": api_version,
			"kind": kind,
			"metadata": {"name": name, "namespace": namespace}
		});
		let key = api_path_for_manifest(&lookup, &self.discovery)?;
		self.resources.read().unwrap().get(&key).cloned()
	}

	/// Overwrite an object as if another client had written it, bumping its resourceVersion.
	pub fn replace_resource(&self, mut manifest: Value) {
		let Some(key) = api_path_for_manifest(&manifest, &self.discovery) else {
			return;
		};
		let mut resources = self.resources.write().unwrap();
		let version = resources
			.get(&key)
			.map(next_resource_version)
			.unwrap_or(1);
		set_resource_version(&mut manifest, version);
		resources.insert(key, manifest);
	}

	/// Every PATCH request received so far, in arrival order.
	pub async fn patch_requests(&self) -> Vec<RecordedPatch> {
		self.server
			.received_requests()
			.await
			.unwrap_or_default()
			.into_iter()
			.filter(|req| req.method.as_str() == "PATCH")
			.map(|req| RecordedPatch {
				path: req.url.path().to_string(),
				content_type: req
					.headers
					.get("content-type")
					.and_then(|v| v.to_str().ok())
					.map(str::to_string),
				body: serde_json::from_slice(&req.body).unwrap_or(Value::Null),
				dry_run: query_param(&req, "dryRun").is_some(),
			})
			.collect()
	}
}

async fn mount_version(server: &MockServer) {
	Mock::given(method("GET"))
		.and(path("/version"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"major": "1",
			"minor": "28",
			"gitVersion": "v1.28.0",
			"gitCommit": "fake",
			"gitTreeState": "clean",
			"buildDate": "2024-01-01T00:00:00Z",
			"goVersion": "go1.21.0",
			"compiler": "gc",
			"platform": "linux/amd64"
		})))
		.mount(server)
		.await;
}

fn aggregated_resource(group: &str, version: &str, r: &super::MockApiResource) -> Value {
	serde_json::json!({
		"resource": r.name,
		"responseKind": {
			"group": group,
			"version": version,
			"kind": r.kind
		},
		"scope": if r.namespaced { "Namespaced" } else { "Cluster" },
		"verbs": r.verbs,
	})
}

fn legacy_resource(r: &super::MockApiResource) -> Value {
	serde_json::json!({
		"name": r.name,
		"singularName": "",
		"namespaced": r.namespaced,
		"kind": r.kind,
		"verbs": r.verbs,
	})
}

async fn mount_discovery(server: &MockServer, discovery: &MockDiscovery, mode: DiscoveryMode) {
	let groups = discovery.groups();

	let core_aggregated_resources: Vec<_> = discovery
		.core_resources
		.iter()
		.map(|r| aggregated_resource("", "v1", r))
		.collect();

	let aggregated_core_body = serde_json::json!({
		"kind": "APIGroupDiscoveryList",
		"apiVersion": "apidiscovery.k8s.io/v2",
		"items": [{
			"metadata": {
				"name": ""
			},
			"versions": [{
				"version": "v1",
				"resources": core_aggregated_resources,
				"freshness": "Current"
			}]
		}]
	});

	let aggregated_groups: Vec<_> = groups
		.iter()
		.map(|(group, versions)| {
			let versions: Vec<_> = versions
				.iter()
				.map(|(version, rs)| {
					let resources: Vec<_> = rs
						.iter()
						.map(|r| aggregated_resource(group, version, r))
						.collect();
					serde_json::json!({
						"version": version,
						"resources": resources,
						"freshness": "Current"
					})
				})
				.collect();

			serde_json::json!({
				"metadata": {
					"name": group
				},
				"versions": versions
			})
		})
		.collect();

	let aggregated_apis_body = serde_json::json!({
		"kind": "APIGroupDiscoveryList",
		"apiVersion": "apidiscovery.k8s.io/v2",
		"items": aggregated_groups
	});

	// The Content-Type must announce the aggregated format or clients fall back to legacy parsing
	const AGGREGATED_DISCOVERY_CONTENT_TYPE: &str =
		"application/json;g=apidiscovery.k8s.io;v=v2;as=APIGroupDiscoveryList";

	match mode {
		DiscoveryMode::Aggregated => {
			// set_body_json would overwrite the Content-Type
			let core_body = serde_json::to_vec(&aggregated_core_body)
				.expect("serializing discovery JSON should never fail");
			let apis_body = serde_json::to_vec(&aggregated_apis_body)
				.expect("serializing discovery JSON should never fail");

			Mock::given(method("GET"))
				.and(path("/api"))
				.and(header_regex("accept", "apidiscovery"))
				.respond_with(
					ResponseTemplate::new(200)
						.set_body_raw(core_body, AGGREGATED_DISCOVERY_CONTENT_TYPE),
				)
				.mount(server)
				.await;

			Mock::given(method("GET"))
				.and(path("/apis"))
				.and(header_regex("accept", "apidiscovery"))
				.respond_with(
					ResponseTemplate::new(200)
						.set_body_raw(apis_body, AGGREGATED_DISCOVERY_CONTENT_TYPE),
				)
				.mount(server)
				.await;
		}
		DiscoveryMode::Legacy => {
			Mock::given(method("GET"))
				.and(path("/api"))
				.and(header_regex("accept", "apidiscovery"))
				.respond_with(ResponseTemplate::new(406))
				.mount(server)
				.await;

			Mock::given(method("GET"))
				.and(path("/apis"))
				.and(header_regex("accept", "apidiscovery"))
				.respond_with(ResponseTemplate::new(406))
				.mount(server)
				.await;
		}
	}

	// Legacy discovery endpoints (fallback)
	Mock::given(method("GET"))
		.and(path("/api"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"kind": "APIVersions",
			"versions": ["v1"],
			"serverAddressByClientCIDRs": []
		})))
		.mount(server)
		.await;

	let legacy_groups: Vec<_> = groups
		.iter()
		.map(|(group, versions)| {
			let entries: Vec<_> = versions
				.iter()
				.map(|(version, _)| {
					serde_json::json!({
						"groupVersion": format!("{}/{}", group, version),
						"version": version
					})
				})
				.collect();
			serde_json::json!({
				"name": group,
				"versions": entries,
				"preferredVersion": entries.first().cloned().unwrap_or(Value::Null)
			})
		})
		.collect();

	Mock::given(method("GET"))
		.and(path("/apis"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"kind": "APIGroupList",
			"apiVersion": "v1",
			"groups": legacy_groups
		})))
		.mount(server)
		.await;

	let core_resources: Vec<_> = discovery
		.core_resources
		.iter()
		.map(legacy_resource)
		.collect();

	Mock::given(method("GET"))
		.and(path("/api/v1"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"kind": "APIResourceList",
			"apiVersion": "v1",
			"groupVersion": "v1",
			"resources": core_resources
		})))
		.mount(server)
		.await;

	for (gv, rs) in &discovery.group_resources {
		let resources: Vec<_> = rs.iter().map(legacy_resource).collect();

		Mock::given(method("GET"))
			.and(path(format!("/apis/{}", gv)))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"kind": "APIResourceList",
				"apiVersion": "v1",
				"groupVersion": gv,
				"resources": resources
			})))
			.mount(server)
			.await;
	}
}

async fn mount_resources(server: &MockServer, resources: &SharedResources) {
	let patch_resources = Arc::clone(resources);
	let get_resources = Arc::clone(resources);

	// PATCH endpoints - JSON merge patch against the stored object.
	// A resourceVersion in the patch acts as a precondition; dry-run requests never persist.
	Mock::given(method("PATCH"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let is_dry_run = query_param(req, "dryRun").is_some();
			let key = parse_resource_path(req.url.path());

			let patch: Value = serde_json::from_slice(&req.body).unwrap_or(Value::Null);

			let mut resources = patch_resources.write().unwrap();
			let Some(existing) = resources.get(&key).cloned() else {
				return status_response(404, "NotFound", &format!("\"{}\" not found", key.1));
			};

			if let Some(expected) = resource_version(&patch) {
				if Some(expected) != resource_version(&existing) {
					return status_response(
						409,
						"Conflict",
						&format!(
							"Operation cannot be fulfilled on \"{}\": the object has been modified; \
							 please apply your changes to the latest version and try again",
							key.1
						),
					);
				}
			}

			let mut merged = merge_patch(existing.clone(), patch);

			if !is_dry_run {
				set_resource_version(&mut merged, next_resource_version(&existing));
				resources.insert(key, merged.clone());
			}

			ResponseTemplate::new(200).set_body_json(merged)
		})
		.mount(server)
		.await;

	// GET endpoints - handles both single resource and LIST
	Mock::given(method("GET"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let path_str = req.url.path();
			let resources = get_resources.read().unwrap();

			let (api_path, name) = parse_resource_path(path_str);

			if !name.is_empty() {
				if let Some(resource) = resources.get(&(api_path.clone(), name.clone())) {
					return ResponseTemplate::new(200).set_body_json(resource.clone());
				}
			}

			let selector = query_param(req, "labelSelector").unwrap_or_default();
			let mut items: Vec<_> = resources
				.iter()
				.filter(|((res_api_path, _), _)| in_collection(res_api_path, path_str))
				.filter(|(_, v)| selector_matches(&selector, v))
				.map(|((_, n), v)| (n.clone(), v.clone()))
				.collect();

			let is_collection = !items.is_empty()
				|| resources
					.keys()
					.any(|(res_api_path, _)| in_collection(res_api_path, path_str))
				|| looks_like_collection(path_str);

			if is_collection {
				items.sort_by(|a, b| a.0.cmp(&b.0));
				let items: Vec<_> = items.into_iter().map(|(_, v)| v).collect();
				return ResponseTemplate::new(200).set_body_json(serde_json::json!({
					"kind": "List",
					"apiVersion": "v1",
					"metadata": {"resourceVersion": "1"},
					"items": items
				}));
			}

			status_response(404, "NotFound", &format!("\"{}\" not found", name))
		})
		.mount(server)
		.await;
}

fn status_response(code: u16, reason: &str, message: &str) -> ResponseTemplate {
	ResponseTemplate::new(code).set_body_json(serde_json::json!({
		"kind": "Status",
		"apiVersion": "v1",
		"metadata": {},
		"status": "Failure",
		"message": message,
		"reason": reason,
		"code": code
	}))
}

fn query_param(req: &Request, key: &str) -> Option<String> {
	req.url
		.query_pairs()
		.find(|(k, _)| k == key)
		.map(|(_, v)| v.into_owned())
}

/// Whether objects stored under `stored` are listed by a GET of `requested`.
///
/// A namespaced collection also belongs to the cluster-wide list of its resource.
fn in_collection(stored: &str, requested: &str) -> bool {
	if stored == requested {
		return true;
	}
	let Some((prefix, rest)) = stored.split_once("/namespaces/") else {
		return false;
	};
	rest.split_once('/')
		.is_some_and(|(_, resource)| requested == format!("{prefix}/{resource}"))
}

/// Whether a path addresses a collection rather than a single object.
///
/// Collections have an even number of segments after the `/api/v1` or
/// `/apis/<group>/<version>` prefix (`<resource>` or `namespaces/<ns>/<resource>`).
fn looks_like_collection(path: &str) -> bool {
	let segments: Vec<_> = path.trim_matches('/').split('/').collect();
	let rest = match segments.first() {
		Some(&"api") => segments.len().saturating_sub(2),
		Some(&"apis") => segments.len().saturating_sub(3),
		_ => return false,
	};
	rest == 1 || rest == 3
}

/// Parse a Kubernetes API path into (api_path, resource_name).
///
/// Examples:
/// - `/api/v1/namespaces/default/configmaps/my-config` -> (`/api/v1/namespaces/default/configmaps`, `my-config`)
/// - `/apis/apps/v1/namespaces/default/deployments/my-deploy` -> (`/apis/apps/v1/namespaces/default/deployments`, `my-deploy`)
/// - `/api/v1/namespaces/my-ns` -> (`/api/v1/namespaces`, `my-ns`)
fn parse_resource_path(path: &str) -> (String, String) {
	let path = path.trim_end_matches('/');
	if let Some(last_slash) = path.rfind('/') {
		let api_path = &path[..last_slash];
		let name = &path[last_slash + 1..];
		(api_path.to_string(), name.to_string())
	} else {
		(path.to_string(), String::new())
	}
}
