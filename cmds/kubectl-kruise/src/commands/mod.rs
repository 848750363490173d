//! Command line surface.

pub mod rollout;
pub mod set;
pub mod top;
pub mod util;

use std::{io::Write, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{instrument, Level};

use crate::{
	config::KruiseConfig,
	k8s::{
		client::{ClusterConnection, ConnectionOptions},
		store::ClusterStore,
		NamespaceScope,
	},
	pipeline::{
		mutate::{MutatorRegistry, Operation},
		resolve::ResolveOptions,
		DryRunStrategy, OperationMode, Pipeline, RunError,
	},
	printer::{OutputFormat, ResourcePrinter},
};

#[derive(Parser)]
#[command(name = "kubectl-kruise")]
#[command(about = "Lifecycle operations for OpenKruise and Kubernetes workloads", long_about = None)]
#[command(version = env!("KUBECTL_KRUISE_VERSION"))]
pub struct Cli {
	#[command(flatten)]
	pub global: GlobalArgs,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
	/// Manage the rollout of a resource
	Rollout(rollout::RolloutArgs),

	/// Set specific features on objects
	Set(set::SetArgs),

	/// Display resource (CPU/memory) usage
	Top(top::TopArgs),
}

/// Flags accepted by every command.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
	/// Path to the kubeconfig file to use for CLI requests
	#[arg(long, global = true)]
	pub kubeconfig: Option<PathBuf>,

	/// The name of the kubeconfig context to use
	#[arg(long, global = true)]
	pub context: Option<String>,

	/// If present, the namespace scope for this CLI request
	#[arg(short = 'n', long, global = true)]
	pub namespace: Option<String>,

	/// How long to wait for a single server request, e.g. 10s or 1m
	#[arg(long, global = true, value_parser = util::parse_timeout)]
	pub request_timeout: Option<Duration>,

	/// Log level (trace, debug, info, warn, error). Overrides RUST_LOG
	#[arg(long, global = true)]
	pub log_level: Option<Level>,
}

impl GlobalArgs {
	/// Connection settings from flags, with the config file filling the gaps.
	pub fn connection_options(&self, config: &KruiseConfig) -> ConnectionOptions {
		let mut opts = ConnectionOptions {
			kubeconfig: self.kubeconfig.clone(),
			context: self.context.clone(),
			namespace: self.namespace.clone(),
			default_namespace: None,
			request_timeout: self.request_timeout,
		};
		config.apply_defaults(&mut opts);
		opts
	}
}

/// How the targets of a command are selected, and how results are shown.
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
	/// TYPE NAME... or TYPE/NAME...
	pub resources: Vec<String>,

	/// Filename or directory of files identifying the resource ('-' for stdin)
	#[arg(short = 'f', long = "filename")]
	pub filenames: Vec<String>,

	/// Process the directory used in -f recursively
	#[arg(short = 'R', long)]
	pub recursive: bool,

	/// Selector (label query) to filter on, e.g. -l key1=value1,key2=value2
	#[arg(short = 'l', long)]
	pub selector: Option<String>,

	/// Select all resources of the given type in the namespace
	#[arg(long)]
	pub all: bool,

	/// Only print the object that would be sent, without sending it.
	/// A bare --dry-run means client
	#[arg(long, value_enum, num_args = 0..=1, default_value = "none", default_missing_value = "client", require_equals = true)]
	pub dry_run: DryRunStrategy,

	/// Output format
	#[arg(short = 'o', long, value_enum)]
	pub output: Option<OutputFormat>,
}

/// A fully configured command, ready to run.
#[derive(Debug, Clone)]
pub struct Invocation {
	pub operation: Operation,
	pub mode: OperationMode,
	pub connection: ConnectionOptions,
	pub resolve: ResolveOptions,
	pub output: OutputFormat,
}

impl Invocation {
	pub fn new(
		global: &GlobalArgs,
		target: TargetArgs,
		operation: Operation,
		local: bool,
		config: &KruiseConfig,
	) -> Result<Self> {
		let mode = OperationMode::from_flags(local, target.dry_run)?;
		let resolve = ResolveOptions {
			selector: target.selector,
			all: target.all,
			args: target.resources,
			filenames: target.filenames,
			recursive: target.recursive,
			local,
			select_all_of_bare_type: operation.selects_all_of_bare_type(),
			..Default::default()
		};
		// Fail on a bad invocation before any connection is made.
		resolve.validate()?;

		Ok(Self {
			operation,
			mode,
			connection: global.connection_options(config),
			resolve,
			output: target.output.or(config.output).unwrap_or_default(),
		})
	}

	/// Connect when needed, run the pipeline, and print to `writer`.
	#[instrument(skip_all, fields(operation = self.operation.name()))]
	pub async fn run<W: Write>(mut self, writer: W) -> Result<()> {
		let registry = MutatorRegistry::builtin();
		let mut printer = ResourcePrinter::new(writer, self.output, self.mode.verb_suffix());

		let store = if self.mode.requires_cluster() {
			let (store, scope) = connect(&self.connection).await?;
			self.resolve.scope = scope;
			Some(store)
		} else {
			let kubeconfig = self.connection.read_kubeconfig().ok();
			self.resolve.scope = self.connection.namespace_scope(kubeconfig.as_ref());
			None
		};

		let pipeline = Pipeline {
			registry: &registry,
			operation: self.operation,
			mode: self.mode,
		};
		match pipeline.run(store.as_ref(), &self.resolve, &mut printer).await {
			Ok(()) => Ok(()),
			Err(RunError::Invalid(err)) => Err(err.into()),
			Err(RunError::Failed(errors)) => Err(errors.into()),
		}
	}
}

/// Read the kubeconfig, connect, and discover the cluster's resource types.
async fn connect(connection: &ConnectionOptions) -> Result<(ClusterStore, NamespaceScope)> {
	let kubeconfig = connection.read_kubeconfig()?;
	let scope = connection.namespace_scope(Some(&kubeconfig));
	let conn = ClusterConnection::connect_with_kubeconfig(connection, kubeconfig)
		.await
		.context("connecting to cluster")?;
	let store = ClusterStore::discover(&conn)
		.await
		.context("discovering API resources")?;
	Ok((store, scope))
}

/// Run a parsed command line.
pub fn run<W: Write>(cli: Cli, writer: W) -> Result<()> {
	let cwd = std::env::current_dir().context("reading working directory")?;
	let config = KruiseConfig::load_from_directory(&cwd)?.unwrap_or_default();

	let invocation = match cli.command {
		Commands::Rollout(args) => rollout::invocation(args, &cli.global, &config)?,
		Commands::Set(args) => set::invocation(args, &cli.global, &config)?,
		Commands::Top(args) => return top::run(args, &cli.global, &config, writer),
	};

	let runtime = util::create_runtime()?;
	runtime.block_on(invocation.run(writer))
}
