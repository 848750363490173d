//! The resource mutation pipeline.
//!
//! Resolve targets, calculate a merge patch per target, apply each patch
//! according to the [`OperationMode`], and aggregate every failure. One
//! target failing never stops the others.

pub mod apply;
pub mod error;
pub mod mutate;
pub mod patch;
pub mod requirements;
pub mod resolve;

use std::{collections::HashMap, io::Write};

use clap::ValueEnum;
use thiserror::Error;
use tracing::instrument;

use self::{
	apply::ApplyExecutor,
	error::{AggregatedError, ValidationError},
	mutate::{MutatorRegistry, Operation},
	patch::calculate_patch,
	resolve::{resolve, ResolveOptions},
};
use crate::{k8s::store::ObjectStore, printer::ResourcePrinter};

/// Value of `--dry-run`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum DryRunStrategy {
	#[default]
	None,
	Client,
	Server,
}

/// Whether and how the apply stage talks to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
	/// Manifests only, no cluster at all.
	Local,
	/// Resolve against the cluster, never write.
	DryRunClient,
	/// Ask the server to validate the write without persisting it.
	DryRunServer,
	Live,
}

impl OperationMode {
	pub fn from_flags(local: bool, dry_run: DryRunStrategy) -> Result<Self, ValidationError> {
		match (local, dry_run) {
			(true, DryRunStrategy::Server) => Err(ValidationError::LocalWithServerDryRun),
			(true, _) => Ok(Self::Local),
			(false, DryRunStrategy::None) => Ok(Self::Live),
			(false, DryRunStrategy::Client) => Ok(Self::DryRunClient),
			(false, DryRunStrategy::Server) => Ok(Self::DryRunServer),
		}
	}

	pub fn requires_cluster(self) -> bool {
		self != Self::Local
	}

	/// Appended to result verbs.
	pub fn verb_suffix(self) -> &'static str {
		match self {
			Self::DryRunClient => " (dry run)",
			Self::DryRunServer => " (server dry run)",
			Self::Local | Self::Live => "",
		}
	}
}

/// A fatal error or the aggregate of per-resource failures.
#[derive(Debug, Error)]
pub enum RunError {
	#[error(transparent)]
	Invalid(#[from] ValidationError),

	#[error(transparent)]
	Failed(#[from] AggregatedError),
}

/// One lifecycle operation, ready to run.
pub struct Pipeline<'a> {
	pub registry: &'a MutatorRegistry,
	pub operation: Operation,
	pub mode: OperationMode,
}

impl Pipeline<'_> {
	/// Run the operation over every resource `opts` names.
	///
	/// Prints one entry per processed resource as it goes.
	#[instrument(skip_all, fields(operation = self.operation.name(), mode = ?self.mode))]
	pub async fn run<S: ObjectStore, W: Write>(
		&self,
		store: Option<&S>,
		opts: &ResolveOptions,
		printer: &mut ResourcePrinter<W>,
	) -> Result<(), RunError> {
		if self.mode.requires_cluster() && store.is_none() {
			return Err(ValidationError::MissingCluster.into());
		}
		let store = if self.mode == OperationMode::Local { None } else { store };

		let mut errors = AggregatedError::new();

		let resolution = resolve(store, opts).await?;
		errors.extend(resolution.errors.into_iter().map(Into::into));

		// Last known state per object, so a target named twice sees the first write.
		let mut applied: HashMap<_, serde_json::Value> = HashMap::new();
		let mut executor = ApplyExecutor::new(store, self.mode, &self.operation, printer);
		for mut handle in resolution.handles {
			let identity = (
				handle.mapping.gvk(),
				handle.namespace.clone(),
				handle.name.clone(),
			);
			if let Some(latest) = applied.get(&identity) {
				tracing::debug!(name = %handle.name, "target repeated, using last applied state");
				handle.refresh(latest.clone());
			}

			let result = calculate_patch(&mut handle, &self.operation, self.registry);
			if let Err(err) = executor.apply(result).await {
				errors.push(err);
			}
			applied.insert(identity, handle.object);
		}

		errors.into_result()?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use rstest::rstest;
	use serde_json::{json, Value};

	use super::{error::PipelineError, patch::PatchError, requirements::ResourceUpdate, *};
	use crate::{
		k8s::store::StoreError,
		pipeline::mutate::MutateError,
		printer::OutputFormat,
		test_utils::MemoryStore,
	};

	fn cloneset(name: &str, paused: bool) -> Value {
		json!({
			"apiVersion": "apps.kruise.io/v1alpha1",
			"kind": "CloneSet",
			"metadata": {"name": name, "namespace": "default", "resourceVersion": "1"},
			"spec": {
				"updateStrategy": {"paused": paused},
				"template": {"spec": {"containers": [
					{"name": "app", "resources": {"limits": {"cpu": "100m"}}}
				]}}
			}
		})
	}

	fn statefulset(name: &str) -> Value {
		json!({
			"apiVersion": "apps/v1",
			"kind": "StatefulSet",
			"metadata": {"name": name, "namespace": "default", "resourceVersion": "1"},
			"spec": {"template": {"spec": {"containers": [{"name": "db"}]}}}
		})
	}

	fn args(args: &[&str]) -> ResolveOptions {
		ResolveOptions {
			args: args.iter().map(|a| a.to_string()).collect(),
			select_all_of_bare_type: true,
			..Default::default()
		}
	}

	async fn run(
		store: &MemoryStore,
		operation: Operation,
		mode: OperationMode,
		opts: &ResolveOptions,
	) -> (String, Result<(), RunError>) {
		let registry = MutatorRegistry::builtin();
		let pipeline = Pipeline {
			registry: &registry,
			operation,
			mode,
		};
		let mut printer = ResourcePrinter::new(Vec::new(), OutputFormat::Name, mode.verb_suffix());
		let result = pipeline.run(Some(store), opts, &mut printer).await;
		(String::from_utf8(printer.into_inner()).unwrap(), result)
	}

	#[rstest]
	#[case(false, DryRunStrategy::None, Ok(OperationMode::Live))]
	#[case(false, DryRunStrategy::Client, Ok(OperationMode::DryRunClient))]
	#[case(false, DryRunStrategy::Server, Ok(OperationMode::DryRunServer))]
	#[case(true, DryRunStrategy::None, Ok(OperationMode::Local))]
	#[case(true, DryRunStrategy::Client, Ok(OperationMode::Local))]
	#[case(true, DryRunStrategy::Server, Err(ValidationError::LocalWithServerDryRun))]
	fn test_mode_from_flags(
		#[case] local: bool,
		#[case] dry_run: DryRunStrategy,
		#[case] expected: Result<OperationMode, ValidationError>,
	) {
		assert_eq!(OperationMode::from_flags(local, dry_run), expected);
	}

	#[tokio::test]
	async fn test_pause_mixed_batch() {
		let store = MemoryStore::new()
			.with_object(cloneset("a", false))
			.with_object(cloneset("b", true))
			.with_object(statefulset("c"));

		let (output, result) = run(
			&store,
			Operation::Pause,
			OperationMode::Live,
			&args(&["cloneset/a", "cloneset/b", "statefulset/c"]),
		)
		.await;

		assert_eq!(
			output,
			"cloneset.apps.kruise.io/a paused\ncloneset.apps.kruise.io/b already paused\n"
		);
		assert_eq!(store.write_count(), 1);
		assert_eq!(store.writes()[0].name, "a");

		let Err(RunError::Failed(errors)) = result else {
			panic!("expected aggregated failure, got {result:?}");
		};
		assert_matches!(
			errors.errors(),
			[PipelineError::Patch {
				name,
				source: PatchError::Mutate(MutateError::UnsupportedKind { .. }),
				..
			}] if name == "c"
		);
	}

	#[tokio::test]
	async fn test_pause_twice() {
		let store = MemoryStore::new().with_object(cloneset("a", false));
		let opts = args(&["cs/a"]);

		let (first, result) = run(&store, Operation::Pause, OperationMode::Live, &opts).await;
		assert!(result.is_ok());
		assert_eq!(first, "cloneset.apps.kruise.io/a paused\n");

		let (second, result) = run(&store, Operation::Pause, OperationMode::Live, &opts).await;
		assert!(result.is_ok());
		assert_eq!(second, "cloneset.apps.kruise.io/a already paused\n");
		assert_eq!(store.write_count(), 1);
	}

	#[tokio::test]
	async fn test_repeated_target_sees_first_write() {
		let store = MemoryStore::new().with_object(cloneset("a", false));

		let (output, result) = run(&store, Operation::Pause, OperationMode::Live, &args(&["cs/a", "cs/a"])).await;

		assert!(result.is_ok(), "{result:?}");
		assert_eq!(
			output,
			"cloneset.apps.kruise.io/a paused\ncloneset.apps.kruise.io/a already paused\n"
		);
		assert_eq!(store.write_count(), 1);
	}

	#[tokio::test]
	async fn test_repeated_restart_is_not_a_conflict() {
		let store = MemoryStore::new().with_object(cloneset("a", false));

		let (output, result) = run(
			&store,
			Operation::Restart,
			OperationMode::Live,
			&args(&["cs/a", "cloneset/a"]),
		)
		.await;

		assert!(result.is_ok(), "{result:?}");
		assert_eq!(
			output,
			"cloneset.apps.kruise.io/a restarted\ncloneset.apps.kruise.io/a restarted\n"
		);
		assert_eq!(store.write_count(), 2);
	}

	#[tokio::test]
	async fn test_restart_twice_writes_twice() {
		let store = MemoryStore::new().with_object(cloneset("a", false));
		let opts = args(&["cs/a"]);

		for _ in 0..2 {
			let (output, result) = run(&store, Operation::Restart, OperationMode::Live, &opts).await;
			assert!(result.is_ok());
			assert_eq!(output, "cloneset.apps.kruise.io/a restarted\n");
		}

		let writes = store.writes();
		assert_eq!(writes.len(), 2);
		assert_ne!(writes[0].patch, writes[1].patch);
	}

	#[rstest]
	#[case(OperationMode::DryRunClient, "cloneset.apps.kruise.io/a paused (dry run)\n")]
	#[case(OperationMode::DryRunServer, "cloneset.apps.kruise.io/a paused (server dry run)\n")]
	#[tokio::test]
	async fn test_dry_run_persists_nothing(#[case] mode: OperationMode, #[case] expected: &str) {
		let store = MemoryStore::new().with_object(cloneset("a", false));

		let (output, result) = run(&store, Operation::Pause, mode, &args(&["cs/a"])).await;
		assert!(result.is_ok());
		assert_eq!(output, expected);

		let stored = store.object("apps.kruise.io/v1alpha1", "CloneSet", "default", "a").unwrap();
		assert_eq!(stored.pointer("/spec/updateStrategy/paused"), Some(&json!(false)));
		if mode == OperationMode::DryRunClient {
			assert_eq!(store.write_count(), 0);
		} else {
			assert!(store.writes().iter().all(|w| w.dry_run));
		}
	}

	#[tokio::test]
	async fn test_server_dry_run_unsupported() {
		let store = MemoryStore::new()
			.with_read_only("apps.kruise.io/v1alpha1", "CloneSet")
			.with_object(cloneset("a", false));

		let (output, result) = run(&store, Operation::Pause, OperationMode::DryRunServer, &args(&["cs/a"])).await;
		assert_eq!(output, "");
		assert_eq!(store.write_count(), 0);
		assert_matches!(
			result,
			Err(RunError::Failed(errors)) if matches!(errors.errors(), [PipelineError::DryRunUnsupported { .. }])
		);
	}

	#[tokio::test]
	async fn test_empty_patch_fails_for_set_resources() {
		let store = MemoryStore::new().with_object(cloneset("a", false));
		let update = ResourceUpdate::new("*", Some("cpu=100m"), None).unwrap();

		let (output, result) = run(
			&store,
			Operation::SetResources(update),
			OperationMode::Live,
			&args(&["cs/a"]),
		)
		.await;

		assert_eq!(output, "");
		assert_eq!(store.write_count(), 0);
		assert_matches!(
			result,
			Err(RunError::Failed(errors)) if matches!(errors.errors(), [PipelineError::EmptyPatch { .. }])
		);
	}

	#[tokio::test]
	async fn test_set_resources_no_matching_container() {
		let store = MemoryStore::new()
			.with_object(cloneset("a", false))
			.with_object(cloneset("b", false));
		let update = ResourceUpdate::new("doesnotexist", Some("memory=1Gi"), None).unwrap();

		let (output, result) = run(
			&store,
			Operation::SetResources(update),
			OperationMode::Live,
			&args(&["cs/a", "cs/b"]),
		)
		.await;

		assert_eq!(output, "");
		assert_eq!(store.write_count(), 0);
		let Err(RunError::Failed(errors)) = result else {
			panic!("expected aggregated failure, got {result:?}");
		};
		assert_eq!(errors.len(), 2);
		assert!(errors
			.errors()
			.iter()
			.all(|e| matches!(e, PipelineError::Patch { source: PatchError::Mutate(MutateError::NoMatchingContainer(_)), .. })));
	}

	#[tokio::test]
	async fn test_stale_handle_conflicts() {
		let store = MemoryStore::new()
			.with_object(cloneset("a", false))
			.with_object(cloneset("b", false));
		store.bump_on_get("b");

		let (output, result) = run(&store, Operation::Pause, OperationMode::Live, &args(&["cs/a", "cs/b"])).await;

		assert_eq!(output, "cloneset.apps.kruise.io/a paused\n");
		let Err(RunError::Failed(errors)) = result else {
			panic!("expected aggregated failure, got {result:?}");
		};
		assert_matches!(
			errors.errors(),
			[err @ PipelineError::Apply { source: StoreError::Conflict, .. }] if err.is_conflict()
		);
	}

	#[tokio::test]
	async fn test_validation_stops_everything() {
		let store = MemoryStore::new().with_object(cloneset("a", false));

		let (output, result) = run(&store, Operation::Pause, OperationMode::Live, &ResolveOptions::default()).await;
		assert_eq!(output, "");
		assert_matches!(result, Err(RunError::Invalid(ValidationError::NoResourceSpecified)));
	}
}
