//! Resource resolution.
//!
//! Turns `TYPE NAME...`, `TYPE/NAME`, `TYPE -l selector`, `TYPE --all` and
//! `-f` manifests into an ordered list of [`ResourceHandle`]s. Individual
//! failures are collected and never stop the remaining entries.

use kube::core::Selector;
use serde_json::Value;
use tracing::instrument;

use super::error::{ResolutionError, ValidationError};
use crate::{
	k8s::{
		discovery::{gvk_from_manifest, ResourceMapping},
		selector::{parse_selector, selects},
		store::{ObjectStore, StoreError},
		NamespaceScope, ResourceScope,
	},
	manifest::{self, Manifest},
};

/// One target object and its last known state.
#[derive(Debug, Clone)]
pub struct ResourceHandle {
	pub namespace: Option<String>,
	pub name: String,
	pub mapping: ResourceMapping,
	pub object: Value,
}

impl ResourceHandle {
	/// Build a handle from an object, reading its name and namespace.
	///
	/// Returns `None` when the object has no `metadata.name`.
	pub fn from_object(mapping: ResourceMapping, object: Value) -> Option<Self> {
		let name = object.pointer("/metadata/name")?.as_str()?.to_string();
		let namespace = match mapping.scope {
			ResourceScope::Namespaced => object
				.pointer("/metadata/namespace")
				.and_then(Value::as_str)
				.map(str::to_string),
			ResourceScope::ClusterWide => None,
		};
		Some(Self {
			namespace,
			name,
			mapping,
			object,
		})
	}

	/// Replace the cached object with the server's representation.
	pub fn refresh(&mut self, object: Value) {
		self.object = object;
	}

	/// `plural[.group]`, used in error messages.
	pub fn resource_string(&self) -> String {
		self.mapping.resource_string()
	}

	/// `kind[.group]/name`, used in result lines.
	pub fn object_name(&self) -> String {
		format!("{}/{}", self.mapping.kind_string(), self.name)
	}
}

/// Everything resolution needs, assembled up front.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
	pub scope: NamespaceScope,
	/// Label selector. Filters LIST calls and `-f` objects alike.
	pub selector: Option<String>,
	pub all: bool,
	/// Positional `TYPE NAME...` or `TYPE/NAME...` arguments.
	pub args: Vec<String>,
	pub filenames: Vec<String>,
	pub recursive: bool,
	/// Work on manifests only, without a cluster.
	pub local: bool,
	/// Whether a bare `TYPE` selects all its objects without `--all`.
	pub select_all_of_bare_type: bool,
}

/// A parsed positional argument.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
	Named { token: String, name: String },
	Select { token: String },
}

impl ResolveOptions {
	/// Check the invocation and parse the positional arguments.
	pub fn validate(&self) -> Result<(), ValidationError> {
		self.targets().map(|_| ())
	}

	/// The parsed `--selector`, if any.
	pub fn label_selector(&self) -> Result<Option<Selector>, ValidationError> {
		self.selector
			.as_deref()
			.map(|selector| {
				parse_selector(selector).map_err(|source| ValidationError::InvalidSelector {
					selector: selector.to_string(),
					source,
				})
			})
			.transpose()
	}

	fn targets(&self) -> Result<Vec<Target>, ValidationError> {
		if self.args.is_empty() && self.filenames.is_empty() {
			return Err(ValidationError::NoResourceSpecified);
		}
		self.label_selector()?;
		if self.all && self.selector.is_some() {
			return Err(ValidationError::AllWithSelector);
		}
		if self.local && !self.args.is_empty() {
			return Err(ValidationError::LocalWithArguments);
		}
		if !self.args.is_empty() && !self.filenames.is_empty() {
			return Err(ValidationError::FilesAndArguments);
		}
		if self.args.is_empty() {
			return Ok(Vec::new());
		}

		let has_selection = self.all || self.selector.is_some();

		if self.args.iter().any(|arg| arg.contains('/')) {
			if self.selector.is_some() {
				return Err(ValidationError::NamesWithSelector);
			}
			return self
				.args
				.iter()
				.map(|arg| match arg.split_once('/') {
					None => Err(ValidationError::MixedArguments),
					Some((token, name)) if token.is_empty() || name.is_empty() || name.contains('/') => {
						Err(ValidationError::MalformedArgument(arg.clone()))
					}
					Some((token, name)) => Ok(Target::Named {
						token: token.to_string(),
						name: name.to_string(),
					}),
				})
				.collect();
		}

		let (types, names) = self.args.split_first().ok_or(ValidationError::NoResourceSpecified)?;
		let tokens: Vec<&str> = types.split(',').filter(|t| !t.is_empty()).collect();

		if names.is_empty() {
			if !has_selection && !self.select_all_of_bare_type {
				return Err(ValidationError::NoNames);
			}
			return Ok(tokens
				.into_iter()
				.map(|token| Target::Select {
					token: token.to_string(),
				})
				.collect());
		}

		if self.selector.is_some() {
			return Err(ValidationError::NamesWithSelector);
		}
		Ok(tokens
			.iter()
			.flat_map(|token| {
				names.iter().map(move |name| Target::Named {
					token: token.to_string(),
					name: name.clone(),
				})
			})
			.collect())
	}

	fn namespace_for(&self, mapping: &ResourceMapping) -> Option<&str> {
		match mapping.scope {
			ResourceScope::Namespaced => Some(&self.scope.namespace),
			ResourceScope::ClusterWide => None,
		}
	}
}

/// Output of a resolution run.
#[derive(Debug, Default)]
pub struct Resolution {
	pub handles: Vec<ResourceHandle>,
	pub errors: Vec<ResolutionError>,
}

/// Resolve every target named by `opts`, in order.
///
/// `store` may only be `None` for local runs.
#[instrument(skip_all, fields(namespace = %opts.scope.namespace, local = opts.local))]
pub async fn resolve<S: ObjectStore>(
	store: Option<&S>,
	opts: &ResolveOptions,
) -> Result<Resolution, ValidationError> {
	let targets = opts.targets()?;
	let selector = opts.label_selector()?;
	if store.is_none() && !opts.local {
		return Err(ValidationError::MissingCluster);
	}

	let mut resolution = Resolution::default();

	if let Some(store) = store {
		for target in &targets {
			resolve_target(store, opts, target, &mut resolution).await;
		}
	}

	for loaded in manifest::load(&opts.filenames, opts.recursive) {
		let manifest = match loaded {
			Ok(manifest) => manifest,
			Err(err) => {
				resolution.errors.push(err.into());
				continue;
			}
		};
		if let Some(selector) = &selector {
			if !selects(selector, &manifest.object) {
				tracing::debug!(source = %manifest.source, "manifest object filtered out by selector");
				continue;
			}
		}
		match resolve_manifest(store, opts, manifest).await {
			Ok(handle) => resolution.handles.push(handle),
			Err(err) => resolution.errors.push(err),
		}
	}

	tracing::debug!(
		handles = resolution.handles.len(),
		errors = resolution.errors.len(),
		"resolved resources"
	);
	Ok(resolution)
}

async fn resolve_target<S: ObjectStore>(
	store: &S,
	opts: &ResolveOptions,
	target: &Target,
	resolution: &mut Resolution,
) {
	let token = match target {
		Target::Named { token, .. } | Target::Select { token } => token,
	};
	let mapping = match store.discovery().resolve_type(token) {
		Ok(mapping) => mapping.clone(),
		Err(err) => {
			resolution.errors.push(err.into());
			return;
		}
	};
	let namespace = opts.namespace_for(&mapping);

	match target {
		Target::Named { name, .. } => match fetch(store, &mapping, namespace, name).await {
			Ok(handle) => resolution.handles.push(handle),
			Err(err) => resolution.errors.push(err),
		},
		Target::Select { .. } => {
			match store.list(&mapping, namespace, opts.selector.as_deref()).await {
				Ok(items) => resolution.handles.extend(
					items
						.into_iter()
						.filter_map(|item| ResourceHandle::from_object(mapping.clone(), item)),
				),
				Err(source) => resolution.errors.push(ResolutionError::List {
					resource: mapping.resource_string(),
					source,
				}),
			}
		}
	}
}

async fn fetch<S: ObjectStore>(
	store: &S,
	mapping: &ResourceMapping,
	namespace: Option<&str>,
	name: &str,
) -> Result<ResourceHandle, ResolutionError> {
	let object = store
		.get(mapping, namespace, name)
		.await
		.map_err(|source| match source {
			StoreError::NotFound => ResolutionError::NotFound {
				resource: mapping.resource_string(),
				name: name.to_string(),
			},
			source => ResolutionError::Get {
				resource: mapping.resource_string(),
				name: name.to_string(),
				source,
			},
		})?;

	let mut handle = ResourceHandle::from_object(mapping.clone(), object).ok_or_else(|| {
		ResolutionError::IncompleteManifest {
			source_name: format!("{}/{name}", mapping.resource_string()),
		}
	})?;
	if handle.namespace.is_none() {
		handle.namespace = namespace.map(str::to_string);
	}
	Ok(handle)
}

async fn resolve_manifest<S: ObjectStore>(
	store: Option<&S>,
	opts: &ResolveOptions,
	manifest: Manifest,
) -> Result<ResourceHandle, ResolutionError> {
	let Manifest { source, object } = manifest;
	let incomplete = || ResolutionError::IncompleteManifest {
		source_name: source.clone(),
	};

	let gvk = gvk_from_manifest(&object).ok_or_else(incomplete)?;
	let name = object
		.pointer("/metadata/name")
		.and_then(Value::as_str)
		.ok_or_else(incomplete)?
		.to_string();

	let object_namespace = object.pointer("/metadata/namespace").and_then(Value::as_str);
	if let Some(ns) = object_namespace {
		if opts.scope.enforce && ns != opts.scope.namespace {
			return Err(ResolutionError::NamespaceMismatch {
				object: ns.to_string(),
				enforced: opts.scope.namespace.clone(),
			});
		}
	}

	let mapping = match store {
		Some(store) => store.discovery().lookup_manifest(&object)?.clone(),
		None => ResourceMapping::from_gvk_guess(&gvk),
	};

	let namespace = match mapping.scope {
		ResourceScope::Namespaced => Some(
			object_namespace
				.unwrap_or(&opts.scope.namespace)
				.to_string(),
		),
		ResourceScope::ClusterWide => None,
	};

	match store {
		Some(store) if !opts.local => fetch(store, &mapping, namespace.as_deref(), &name).await,
		_ => Ok(ResourceHandle {
			namespace,
			name,
			mapping,
			object,
		}),
	}
}
