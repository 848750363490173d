//! Merge patch calculation.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::instrument;

use super::{
	mutate::{MutateError, Mutation, MutatorRegistry, Operation},
	resolve::ResourceHandle,
};

#[derive(Debug, Error)]
pub enum PatchError {
	#[error(transparent)]
	Mutate(#[from] MutateError),

	#[error("failed to encode object")]
	Encoding(#[source] serde_json::Error),
}

/// What the calculator produced for one handle.
#[derive(Debug)]
pub enum PatchOutcome {
	/// A non-empty merge patch, and the locally mutated object.
	Changed { patch: Vec<u8>, mutated: Value },
	/// The object already satisfies the desired state.
	Unchanged,
	Failed(PatchError),
}

/// Patch computed for one handle. Consumed once by the apply stage.
#[derive(Debug)]
pub struct PatchResult<'h> {
	pub handle: &'h mut ResourceHandle,
	pub outcome: PatchOutcome,
}

/// `{}` and zero-length bytes both mean "no change".
fn is_empty_patch(patch: &[u8]) -> bool {
	patch.is_empty() || patch == b"{}"
}

/// Compute the RFC 7396 merge patch turning `original` into `modified`.
///
/// Objects are diffed by key, keys missing from `modified` become `null`,
/// everything else is replaced wholesale.
pub fn create_merge_patch(original: &Value, modified: &Value) -> Value {
	let (Value::Object(original), Value::Object(modified)) = (original, modified) else {
		return modified.clone();
	};

	let mut patch = Map::new();
	for (key, old) in original {
		match modified.get(key) {
			None => {
				patch.insert(key.clone(), Value::Null);
			}
			Some(new) if new != old => {
				patch.insert(key.clone(), create_merge_patch(old, new));
			}
			Some(_) => {}
		}
	}
	for (key, new) in modified {
		if !original.contains_key(key) {
			patch.insert(key.clone(), new.clone());
		}
	}
	Value::Object(patch)
}

/// Add the object's `resourceVersion` so the server rejects a stale write.
fn with_precondition(mut patch: Value, original: &Value) -> Value {
	let version = original
		.pointer("/metadata/resourceVersion")
		.and_then(Value::as_str);
	if let (Some(version), Value::Object(map)) = (version, &mut patch) {
		let metadata = map
			.entry("metadata")
			.or_insert_with(|| Value::Object(Map::new()));
		if let Value::Object(metadata) = metadata {
			metadata.insert("resourceVersion".to_string(), Value::String(version.to_string()));
		}
	}
	patch
}

/// Mutate a copy of the handle's object and diff it against the original.
///
/// A failure is attached to the result and never stops the batch.
#[instrument(skip_all, fields(name = %handle.name, operation = operation.name()))]
pub fn calculate_patch<'h>(
	handle: &'h mut ResourceHandle,
	operation: &Operation,
	registry: &MutatorRegistry,
) -> PatchResult<'h> {
	let outcome = patch_outcome(handle, operation, registry);
	tracing::debug!(
		changed = matches!(outcome, PatchOutcome::Changed { .. }),
		"calculated patch"
	);
	PatchResult { handle, outcome }
}

fn patch_outcome(
	handle: &ResourceHandle,
	operation: &Operation,
	registry: &MutatorRegistry,
) -> PatchOutcome {
	let ar = &handle.mapping.api_resource;
	let mut mutated = handle.object.clone();

	match operation.mutate(registry, &ar.group, &ar.kind, &mut mutated) {
		Ok(Mutation::Unchanged) => return PatchOutcome::Unchanged,
		Ok(Mutation::Changed) => {}
		Err(err) => return PatchOutcome::Failed(err.into()),
	}

	let encoded = serde_json::to_vec(&handle.object)
		.and_then(|original| Ok((original, serde_json::to_vec(&mutated)?)));
	match encoded {
		Ok((original, modified)) if original == modified => return PatchOutcome::Unchanged,
		Ok(_) => {}
		Err(err) => return PatchOutcome::Failed(PatchError::Encoding(err)),
	}

	let patch = create_merge_patch(&handle.object, &mutated);
	match serde_json::to_vec(&patch) {
		Ok(diff) if is_empty_patch(&diff) => return PatchOutcome::Unchanged,
		Ok(_) => {}
		Err(err) => return PatchOutcome::Failed(PatchError::Encoding(err)),
	}

	match serde_json::to_vec(&with_precondition(patch, &handle.object)) {
		Ok(patch) => PatchOutcome::Changed { patch, mutated },
		Err(err) => PatchOutcome::Failed(PatchError::Encoding(err)),
	}
}
