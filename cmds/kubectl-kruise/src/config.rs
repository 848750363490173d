//! Defaults from `.kubectl-kruise.yaml`.
//!
//! The file is searched from the working directory upward to the filesystem
//! root. Command line flags override anything it sets.

use std::{
	fs,
	path::{Path, PathBuf},
	time::Duration,
};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::{k8s::client::ConnectionOptions, printer::OutputFormat};

/// The name of the config file searched for.
pub const CONFIG_FILE_NAME: &str = ".kubectl-kruise.yaml";

/// Contents of `.kubectl-kruise.yaml`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct KruiseConfig {
	pub context: Option<String>,
	pub namespace: Option<String>,
	pub kubeconfig: Option<PathBuf>,
	pub request_timeout_seconds: Option<u64>,
	pub output: Option<OutputFormat>,
}

impl KruiseConfig {
	/// Load config by searching from the given directory upward.
	pub fn load_from_directory(start_dir: &Path) -> Result<Option<Self>> {
		match find_config_file(start_dir) {
			Some(path) => {
				tracing::debug!(path = %path.display(), "loading config file");
				Self::load_from_file(&path).map(Some)
			}
			None => Ok(None),
		}
	}

	/// Load config from a specific file path.
	pub fn load_from_file(path: &Path) -> Result<Self> {
		let content = fs::read_to_string(path)
			.with_context(|| format!("failed to read config file: {}", path.display()))?;
		if content.trim().is_empty() {
			return Ok(Self::default());
		}
		serde_yaml_with_quirks::from_str(&content)
			.with_context(|| format!("failed to parse config file: {}", path.display()))
	}

	/// Fill connection settings the command line left unset.
	pub fn apply_defaults(&self, opts: &mut ConnectionOptions) {
		if opts.context.is_none() {
			opts.context.clone_from(&self.context);
		}
		if opts.default_namespace.is_none() {
			opts.default_namespace.clone_from(&self.namespace);
		}
		if opts.kubeconfig.is_none() {
			opts.kubeconfig.clone_from(&self.kubeconfig);
		}
		if opts.request_timeout.is_none() {
			opts.request_timeout = self.request_timeout_seconds.map(Duration::from_secs);
		}
	}
}

/// Search for a config file starting from `start_dir` and walking up to the filesystem root.
pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
	let start = start_dir
		.canonicalize()
		.unwrap_or_else(|_| start_dir.to_path_buf());

	start
		.ancestors()
		.map(|dir| dir.join(CONFIG_FILE_NAME))
		.find(|candidate| candidate.is_file())
}
