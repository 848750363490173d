//! Error taxonomy of the mutation pipeline.
//!
//! [`ValidationError`] is fatal and stops the command before any resource
//! is touched. Everything else is recorded per resource into an
//! [`AggregatedError`] while the batch carries on.

use std::{error::Error as StdError, fmt};

use thiserror::Error;

use super::patch::PatchError;
use crate::{
	k8s::{discovery::DiscoveryError, selector::SelectorError, store::StoreError},
	manifest::ManifestError,
	printer::OutputError,
};

/// A bad invocation. Nothing is processed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
	#[error("no resource specified")]
	NoResourceSpecified,

	#[error("cannot set --all and --selector at the same time")]
	AllWithSelector,

	#[error("cannot specify --local and --dry-run=server - did you mean --dry-run=client?")]
	LocalWithServerDryRun,

	#[error("can only use local files by -f rsrc.yaml or --filename=rsrc.json when --local=true is set")]
	LocalWithArguments,

	#[error("resource(s) were provided, but no name was specified")]
	NoNames,

	#[error("there is no need to specify a resource type as a separate argument when passing arguments in resource/name form (e.g. 'kubectl-kruise rollout pause cloneset/a' instead of 'kubectl-kruise rollout pause cloneset cloneset/a')")]
	MixedArguments,

	#[error("arguments in resource/name form must have a single resource and name: \"{0}\"")]
	MalformedArgument(String),

	#[error("name cannot be provided when a selector is specified")]
	NamesWithSelector,

	#[error("specifying a resource type together with -f is not supported")]
	FilesAndArguments,

	#[error("you must specify an update to requests or limits (in the form of --requests/--limits)")]
	MissingRequirements,

	#[error("invalid {flag} entry \"{entry}\": expected name=quantity")]
	InvalidRequirement { flag: &'static str, entry: String },

	#[error("couldn't parse the selector string \"{selector}\"")]
	InvalidSelector {
		selector: String,
		#[source]
		source: SelectorError,
	},

	#[error("invalid container selector \"{0}\"")]
	InvalidContainerSelector(String),

	#[error("a cluster connection is required unless --local is set")]
	MissingCluster,
}

/// Failure to turn one token or manifest into a [`ResourceHandle`](super::resolve::ResourceHandle).
#[derive(Debug, Error)]
pub enum ResolutionError {
	#[error(transparent)]
	Discovery(#[from] DiscoveryError),

	#[error(transparent)]
	Manifest(#[from] ManifestError),

	#[error("{resource} \"{name}\" not found")]
	NotFound { resource: String, name: String },

	#[error("failed to get {resource} \"{name}\"")]
	Get {
		resource: String,
		name: String,
		#[source]
		source: StoreError,
	},

	#[error("failed to list {resource}")]
	List {
		resource: String,
		#[source]
		source: StoreError,
	},

	#[error("{source_name}: object is missing apiVersion, kind or metadata.name")]
	IncompleteManifest { source_name: String },

	#[error("the namespace from the provided object \"{object}\" does not match the namespace \"{enforced}\". You must pass '--namespace={object}' to perform this operation.")]
	NamespaceMismatch { object: String, enforced: String },
}

/// A recorded per-resource failure.
#[derive(Debug, Error)]
pub enum PipelineError {
	#[error(transparent)]
	Resolution(#[from] ResolutionError),

	#[error("{resource} \"{name}\"")]
	Patch {
		resource: String,
		name: String,
		#[source]
		source: PatchError,
	},

	#[error("failed to create patch for {name}: empty patch")]
	EmptyPatch { resource: String, name: String },

	#[error("failed to patch {resource} \"{name}\": server side dry run is not supported for this resource")]
	DryRunUnsupported { resource: String, name: String },

	#[error("failed to patch {resource} \"{name}\"")]
	Apply {
		resource: String,
		name: String,
		#[source]
		source: StoreError,
	},

	#[error("failed to print {resource} \"{name}\"")]
	Print {
		resource: String,
		name: String,
		#[source]
		source: OutputError,
	},
}

impl PipelineError {
	/// Whether this is an apply rejected by an optimistic concurrency check.
	pub fn is_conflict(&self) -> bool {
		matches!(
			self,
			Self::Apply {
				source: StoreError::Conflict,
				..
			}
		)
	}
}

/// Every failure recorded during one command, in the order it happened.
#[derive(Debug, Default)]
pub struct AggregatedError {
	errors: Vec<PipelineError>,
}

impl AggregatedError {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&mut self, err: impl Into<PipelineError>) {
		let err = err.into();
		tracing::warn!(error = %DisplayChain(&err), "recorded failure");
		self.errors.push(err);
	}

	pub fn extend(&mut self, errors: impl IntoIterator<Item = PipelineError>) {
		for err in errors {
			self.push(err);
		}
	}

	pub fn is_empty(&self) -> bool {
		self.errors.is_empty()
	}

	pub fn len(&self) -> usize {
		self.errors.len()
	}

	pub fn errors(&self) -> &[PipelineError] {
		&self.errors
	}

	/// One line per recorded error, each with its causes.
	pub fn lines(&self) -> impl Iterator<Item = String> + '_ {
		self.errors.iter().map(|err| DisplayChain(err).to_string())
	}

	/// `Ok` when nothing was recorded.
	pub fn into_result(self) -> Result<(), Self> {
		if self.is_empty() {
			Ok(())
		} else {
			Err(self)
		}
	}
}

impl fmt::Display for AggregatedError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for (i, line) in self.lines().enumerate() {
			if i > 0 {
				writeln!(f)?;
			}
			f.write_str(&line)?;
		}
		Ok(())
	}
}

impl StdError for AggregatedError {}

/// Formats an error followed by its source chain, separated by `: `.
struct DisplayChain<'a>(&'a dyn StdError);

impl fmt::Display for DisplayChain<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)?;
		let mut source = self.0.source();
		while let Some(err) = source {
			write!(f, ": {err}")?;
			source = err.source();
		}
		Ok(())
	}
}
