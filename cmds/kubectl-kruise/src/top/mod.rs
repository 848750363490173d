//! CPU and memory usage of the pods a CloneSet owns.
//!
//! Pods are found through the CloneSet's pod template labels and their usage
//! is read from the `metrics.k8s.io` API, one PodMetrics object per pod.

pub mod quantity;

use std::{cmp::Reverse, io::Write};

use clap::ValueEnum;
use kube::core::{GroupVersionKind, Selector};
use serde_json::Value;
use tabwriter::TabWriter;
use thiserror::Error;
use tracing::instrument;

use self::quantity::{Quantity, QuantityError};
use crate::k8s::{
	discovery::DiscoveryError,
	selector::{parse_selector, SelectorError},
	store::{ObjectStore, StoreError},
};

/// Value of `--sort-by`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SortBy {
	Cpu,
	Memory,
}

#[derive(Debug, Error)]
pub enum TopError {
	#[error("only one of NAME or --selector can be provided")]
	NameAndSelector,

	#[error("couldn't parse the selector string")]
	InvalidSelector(#[from] SelectorError),

	#[error("Metrics API not available")]
	MetricsUnavailable,

	#[error(transparent)]
	Discovery(#[from] DiscoveryError),

	#[error("failed to retrieve CloneSet {name}")]
	CloneSet {
		name: String,
		#[source]
		source: StoreError,
	},

	#[error("failed to list {what}")]
	List {
		what: &'static str,
		#[source]
		source: StoreError,
	},

	#[error("failed to get metrics of pod {pod}")]
	Metrics {
		pod: String,
		#[source]
		source: StoreError,
	},

	#[error("metrics not available yet")]
	MetricsNotReady,

	#[error("invalid {resource} usage reported for pod {pod}")]
	Usage {
		pod: String,
		resource: &'static str,
		#[source]
		source: QuantityError,
	},

	#[error("failed to write output")]
	Output(#[from] std::io::Error),
}

/// What to show and where to look.
#[derive(Debug, Clone, Default)]
pub struct TopOptions {
	pub name: Option<String>,
	pub selector: Option<String>,
	pub namespace: String,
	pub all_namespaces: bool,
	pub sort_by: Option<SortBy>,
	pub no_headers: bool,
}

impl TopOptions {
	pub fn validate(&self) -> Result<(), TopError> {
		if self.name.is_some() && self.selector.is_some() {
			return Err(TopError::NameAndSelector);
		}
		if let Some(selector) = &self.selector {
			parse_selector(selector)?;
		}
		Ok(())
	}

	/// Namespace for LIST calls, `None` across all namespaces.
	fn list_namespace(&self) -> Option<&str> {
		(!self.all_namespaces).then_some(self.namespace.as_str())
	}
}

/// Summed container usage of one pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodUsage {
	pub namespace: String,
	pub name: String,
	pub cpu: Quantity,
	pub memory: Quantity,
}

impl PodUsage {
	/// Read a PodMetrics object.
	pub fn from_metrics(metrics: &Value) -> Result<Self, TopError> {
		let name = metrics
			.pointer("/metadata/name")
			.and_then(Value::as_str)
			.unwrap_or_default()
			.to_string();
		let namespace = metrics
			.pointer("/metadata/namespace")
			.and_then(Value::as_str)
			.unwrap_or_default()
			.to_string();

		let containers = metrics
			.get("containers")
			.and_then(Value::as_array)
			.map(Vec::as_slice)
			.unwrap_or_default();
		let total = |resource: &'static str| {
			containers
				.iter()
				.filter_map(|c| c.pointer(&format!("/usage/{resource}"))?.as_str())
				.map(|q| {
					q.parse::<Quantity>().map_err(|source| TopError::Usage {
						pod: name.clone(),
						resource,
						source,
					})
				})
				.sum::<Result<Quantity, _>>()
		};

		Ok(Self {
			cpu: total("cpu")?,
			memory: total("memory")?,
			namespace,
			name,
		})
	}
}

fn gvk(group: &str, version: &str, kind: &str) -> GroupVersionKind {
	GroupVersionKind::gvk(group, version, kind)
}

/// Pods selected by a CloneSet's template labels, as a LIST selector.
///
/// `None` when the template has no labels: an empty selector would match
/// every pod in the namespace.
fn owned_pods_selector(cloneset: &Value) -> Option<String> {
	let labels = cloneset
		.pointer("/spec/template/metadata/labels")
		.and_then(Value::as_object)?;
	let selector: Selector = labels
		.iter()
		.filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
		.collect();
	let selector = selector.to_string();
	(!selector.is_empty()).then_some(selector)
}

/// Usage of every pod owned by the selected CloneSets, sorted as requested.
///
/// Pods without metrics yet are skipped. When pods exist but none has
/// metrics, [`TopError::MetricsNotReady`] is returned.
#[instrument(skip_all, fields(name = opts.name.as_deref(), all_namespaces = opts.all_namespaces))]
pub async fn collect_usage<S: ObjectStore>(store: &S, opts: &TopOptions) -> Result<Vec<PodUsage>, TopError> {
	let discovery = store.discovery();
	let pod_metrics = discovery
		.lookup(&gvk("metrics.k8s.io", "v1beta1", "PodMetrics"))
		.ok_or(TopError::MetricsUnavailable)?;
	let pods = discovery
		.lookup(&gvk("", "v1", "Pod"))
		.ok_or_else(|| DiscoveryError::UnknownType("pods".to_string()))?;
	let clonesets = discovery.resolve_type("clonesets.apps.kruise.io")?;

	let owners = match &opts.name {
		Some(name) => vec![store
			.get(clonesets, Some(opts.namespace.as_str()), name)
			.await
			.map_err(|source| TopError::CloneSet {
				name: name.clone(),
				source,
			})?],
		None => store
			.list(clonesets, opts.list_namespace(), opts.selector.as_deref())
			.await
			.map_err(|source| TopError::List {
				what: "clonesets",
				source,
			})?,
	};

	let mut usage = Vec::new();
	let mut pod_count = 0;
	for owner in &owners {
		let namespace = owner
			.pointer("/metadata/namespace")
			.and_then(Value::as_str)
			.unwrap_or(opts.namespace.as_str());
		let Some(selector) = owned_pods_selector(owner) else {
			tracing::debug!(
				cloneset = owner.pointer("/metadata/name").and_then(serde_json::Value::as_str),
				"pod template has no labels, skipping"
			);
			continue;
		};

		let owned = store
			.list(pods, Some(namespace), Some(selector.as_str()))
			.await
			.map_err(|source| TopError::List { what: "pods", source })?;
		pod_count += owned.len();

		for pod in &owned {
			let Some(pod_name) = pod.pointer("/metadata/name").and_then(Value::as_str) else {
				continue;
			};
			match store.get(pod_metrics, Some(namespace), pod_name).await {
				Ok(metrics) => usage.push(PodUsage::from_metrics(&metrics)?),
				Err(StoreError::NotFound) => tracing::debug!(pod = pod_name, "no metrics for pod yet"),
				Err(source) => {
					return Err(TopError::Metrics {
						pod: pod_name.to_string(),
						source,
					})
				}
			}
		}
	}

	if usage.is_empty() && pod_count > 0 {
		return Err(TopError::MetricsNotReady);
	}

	match opts.sort_by {
		Some(SortBy::Cpu) => usage.sort_by_key(|u| Reverse(u.cpu)),
		Some(SortBy::Memory) => usage.sort_by_key(|u| Reverse(u.memory)),
		None => {}
	}
	Ok(usage)
}

/// Print usage the way `kubectl top pod` does.
pub fn print_usage<W: Write>(out: W, usage: &[PodUsage], opts: &TopOptions) -> Result<(), TopError> {
	let mut tw = TabWriter::new(out).padding(2);
	if !opts.no_headers {
		if opts.all_namespaces {
			write!(tw, "NAMESPACE\t")?;
		}
		writeln!(tw, "NAME\tCPU(cores)\tMEMORY(bytes)")?;
	}
	for pod in usage {
		if opts.all_namespaces {
			write!(tw, "{}\t", pod.namespace)?;
		}
		writeln!(
			tw,
			"{}\t{}m\t{}Mi",
			pod.name,
			pod.cpu.milli_value(),
			pod.memory.value() / (1024 * 1024)
		)?;
	}
	tw.flush()?;
	Ok(())
}
