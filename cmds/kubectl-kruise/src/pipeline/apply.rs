//! Apply stage: send patches, or show what would be sent.

use std::io::Write;

use serde_json::Value;
use tracing::instrument;

use super::{
	error::PipelineError,
	mutate::{EmptyPatchPolicy, Operation},
	patch::{PatchOutcome, PatchResult},
	resolve::ResourceHandle,
	OperationMode,
};
use crate::{k8s::store::ObjectStore, printer::ResourcePrinter};

/// Applies calculated patches one at a time and prints a line per resource.
pub struct ApplyExecutor<'a, S, W> {
	store: Option<&'a S>,
	mode: OperationMode,
	operation: &'a Operation,
	printer: &'a mut ResourcePrinter<W>,
}

impl<'a, S: ObjectStore, W: Write> ApplyExecutor<'a, S, W> {
	pub fn new(
		store: Option<&'a S>,
		mode: OperationMode,
		operation: &'a Operation,
		printer: &'a mut ResourcePrinter<W>,
	) -> Self {
		Self {
			store,
			mode,
			operation,
			printer,
		}
	}

	/// Process one patch result.
	///
	/// The store is never called for an empty patch, nor in local and client
	/// dry run modes.
	#[instrument(skip_all, fields(name = %result.handle.name, mode = ?self.mode))]
	pub async fn apply(&mut self, result: PatchResult<'_>) -> Result<(), PipelineError> {
		let PatchResult { handle, outcome } = result;

		let (patch, mutated) = match outcome {
			PatchOutcome::Failed(source) => {
				return Err(PipelineError::Patch {
					resource: handle.resource_string(),
					name: handle.name.clone(),
					source,
				})
			}
			PatchOutcome::Unchanged => {
				return match self.operation.empty_patch_policy() {
					EmptyPatchPolicy::Report(verb) => self.print(handle, &handle.object, verb),
					EmptyPatchPolicy::Fail => Err(PipelineError::EmptyPatch {
						resource: handle.resource_string(),
						name: handle.name.clone(),
					}),
				};
			}
			PatchOutcome::Changed { patch, mutated } => (patch, mutated),
		};

		let verb = self.operation.verb();
		let store = match (self.mode, self.store) {
			(OperationMode::Local | OperationMode::DryRunClient, _) | (_, None) => {
				tracing::debug!("printing locally mutated object");
				return self.print(handle, &mutated, verb);
			}
			(_, Some(store)) => store,
		};

		let dry_run = self.mode == OperationMode::DryRunServer;
		if dry_run && !store.discovery().supports_dry_run(&handle.mapping.gvk()) {
			return Err(PipelineError::DryRunUnsupported {
				resource: handle.resource_string(),
				name: handle.name.clone(),
			});
		}

		let applied = store
			.patch(
				&handle.mapping,
				handle.namespace.as_deref(),
				&handle.name,
				&patch,
				dry_run,
			)
			.await
			.map_err(|source| PipelineError::Apply {
				resource: handle.resource_string(),
				name: handle.name.clone(),
				source,
			})?;
		tracing::debug!(dry_run, "patch accepted");

		if dry_run {
			return self.print(handle, &applied, verb);
		}
		handle.refresh(applied);
		self.print(handle, &handle.object, verb)
	}

	fn print(&mut self, handle: &ResourceHandle, object: &Value, verb: &str) -> Result<(), PipelineError> {
		self.printer
			.print(&handle.object_name(), object, verb)
			.map_err(|source| PipelineError::Print {
				resource: handle.resource_string(),
				name: handle.name.clone(),
				source,
			})
	}
}
