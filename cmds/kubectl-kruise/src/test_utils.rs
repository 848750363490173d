//! Common test utilities.

use std::{
	collections::HashSet,
	io::{self, ErrorKind, Write},
	sync::Mutex,
};

use k8s_mock::{
	helpers::{merge_patch, next_resource_version, resource_version, selector_matches, set_resource_version},
	MockApiResource, MockDiscovery,
};
use kube::{core::GroupVersionKind, discovery::ApiResource};
use serde_json::Value;

use crate::{
	k8s::{
		discovery::{gvk_from_manifest, ApiResourceCache, ResourceMapping},
		store::{ObjectStore, StoreError},
		ResourceScope,
	},
	pipeline::resolve::ResourceHandle,
};

/// A writer that simulates a broken pipe (SIGPIPE scenario).
pub struct BrokenPipeWriter;

impl Write for BrokenPipeWriter {
	fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
		Err(io::Error::new(ErrorKind::BrokenPipe, "broken pipe"))
	}

	fn flush(&mut self) -> io::Result<()> {
		Err(io::Error::new(ErrorKind::BrokenPipe, "broken pipe"))
	}
}

/// Build a handle straight from an object, guessing its mapping.
pub fn handle(object: Value) -> ResourceHandle {
	let gvk = gvk_from_manifest(&object).expect("object has apiVersion and kind");
	ResourceHandle::from_object(ResourceMapping::from_gvk_guess(&gvk), object)
		.expect("object has a name")
}

/// Discovery cache matching the mock server's default resources.
pub fn discovery_cache(discovery: &MockDiscovery) -> ApiResourceCache {
	let core = discovery.core_resources.iter().map(|r| ("v1", r));
	let grouped = discovery
		.group_resources
		.iter()
		.flat_map(|(gv, resources)| resources.iter().map(move |r| (gv.as_str(), r)));

	ApiResourceCache::from_mappings(core.chain(grouped).map(|(api_version, res)| mapping(api_version, res)))
}

fn mapping(api_version: &str, res: &MockApiResource) -> ResourceMapping {
	let (group, version) = api_version.split_once('/').unwrap_or(("", api_version));
	let gvk = GroupVersionKind::gvk(group, version, &res.kind);
	let scope = if res.namespaced {
		ResourceScope::Namespaced
	} else {
		ResourceScope::ClusterWide
	};
	ResourceMapping::new(
		ApiResource::from_gvk_with_plural(&gvk, &res.name),
		scope,
		res.verbs.clone(),
	)
}

/// A write received by [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct RecordedWrite {
	pub name: String,
	pub patch: Vec<u8>,
	pub dry_run: bool,
}

#[derive(Default)]
struct State {
	objects: Vec<Value>,
	writes: Vec<RecordedWrite>,
	bump_on_get: HashSet<String>,
}

/// In-memory [`ObjectStore`] recording every patch call.
pub struct MemoryStore {
	discovery: MockDiscovery,
	cache: ApiResourceCache,
	state: Mutex<State>,
}

impl MemoryStore {
	pub fn new() -> Self {
		let discovery = MockDiscovery::default();
		Self {
			cache: discovery_cache(&discovery),
			discovery,
			state: Mutex::default(),
		}
	}

	pub fn with_object(self, mut object: Value) -> Self {
		if resource_version(&object).is_none() {
			set_resource_version(&mut object, 1);
		}
		self.state.lock().unwrap().objects.push(object);
		self
	}

	/// Serve `kind` without the patch verb.
	pub fn with_read_only(self, api_version: &str, kind: &str) -> Self {
		let name = self
			.discovery
			.find(api_version, kind)
			.map(|r| r.name.clone())
			.expect("kind is served by the mock discovery");
		self.with_api_resource(api_version, MockApiResource::read_only(&name, kind))
	}

	/// Advertise an extra resource, replacing one of the same kind.
	pub fn with_api_resource(mut self, group_version: &str, resource: MockApiResource) -> Self {
		self.discovery = self.discovery.with_resource(group_version, resource);
		self.cache = discovery_cache(&self.discovery);
		self
	}

	/// Make the object appear modified by someone else right after it is read.
	pub fn bump_on_get(&self, name: &str) {
		self.state.lock().unwrap().bump_on_get.insert(name.to_string());
	}

	pub fn object(&self, api_version: &str, kind: &str, namespace: &str, name: &str) -> Option<Value> {
		self.state
			.lock()
			.unwrap()
			.objects
			.iter()
			.find(|o| {
				o["apiVersion"] == api_version
					&& o["kind"] == kind
					&& o["metadata"]["namespace"] == namespace
					&& o["metadata"]["name"] == name
			})
			.cloned()
	}

	pub fn writes(&self) -> Vec<RecordedWrite> {
		self.state.lock().unwrap().writes.clone()
	}

	pub fn write_count(&self) -> usize {
		self.state.lock().unwrap().writes.len()
	}
}

fn is_instance(object: &Value, mapping: &ResourceMapping, namespace: Option<&str>) -> bool {
	let ar = &mapping.api_resource;
	object["apiVersion"] == ar.api_version.as_str()
		&& object["kind"] == ar.kind.as_str()
		&& namespace.is_none_or(|ns| object["metadata"]["namespace"] == ns)
}

fn object_name(object: &Value) -> &str {
	object["metadata"]["name"].as_str().unwrap_or_default()
}

impl ObjectStore for MemoryStore {
	fn discovery(&self) -> &ApiResourceCache {
		&self.cache
	}

	async fn get(
		&self,
		mapping: &ResourceMapping,
		namespace: Option<&str>,
		name: &str,
	) -> Result<Value, StoreError> {
		let mut state = self.state.lock().unwrap();
		let bump = state.bump_on_get.remove(name);
		let object = state
			.objects
			.iter_mut()
			.find(|o| is_instance(o, mapping, namespace) && object_name(o) == name)
			.ok_or(StoreError::NotFound)?;

		let found = object.clone();
		if bump {
			let version = next_resource_version(object);
			set_resource_version(object, version);
		}
		Ok(found)
	}

	async fn list(
		&self,
		mapping: &ResourceMapping,
		namespace: Option<&str>,
		selector: Option<&str>,
	) -> Result<Vec<Value>, StoreError> {
		let state = self.state.lock().unwrap();
		let mut items: Vec<Value> = state
			.objects
			.iter()
			.filter(|o| is_instance(o, mapping, namespace))
			.filter(|o| selector.is_none_or(|s| selector_matches(s, o)))
			.cloned()
			.collect();
		items.sort_by(|a, b| object_name(a).cmp(object_name(b)));
		Ok(items)
	}

	async fn patch(
		&self,
		mapping: &ResourceMapping,
		namespace: Option<&str>,
		name: &str,
		patch: &[u8],
		dry_run: bool,
	) -> Result<Value, StoreError> {
		let body: Value = serde_json::from_slice(patch).map_err(StoreError::InvalidPatch)?;

		let mut state = self.state.lock().unwrap();
		state.writes.push(RecordedWrite {
			name: name.to_string(),
			patch: patch.to_vec(),
			dry_run,
		});

		let object = state
			.objects
			.iter_mut()
			.find(|o| is_instance(o, mapping, namespace) && object_name(o) == name)
			.ok_or(StoreError::NotFound)?;

		if let Some(expected) = resource_version(&body) {
			if resource_version(object) != Some(expected) {
				return Err(StoreError::Conflict);
			}
		}

		let mut merged = merge_patch(object.clone(), body);
		if dry_run {
			return Ok(merged);
		}
		set_resource_version(&mut merged, next_resource_version(object));
		*object = merged.clone();
		Ok(merged)
	}
}
