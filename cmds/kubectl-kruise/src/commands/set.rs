//! `set resources`.

use anyhow::Result;
use clap::{Args, Subcommand};

use super::{GlobalArgs, Invocation, TargetArgs};
use crate::{
	config::KruiseConfig,
	pipeline::{mutate::Operation, requirements::ResourceUpdate},
};

#[derive(Args)]
pub struct SetArgs {
	#[command(subcommand)]
	pub command: SetCommands,
}

#[derive(Subcommand)]
pub enum SetCommands {
	/// Update resource requests/limits on objects with pod templates
	///
	/// Possible resources include Pod, Deployment, ReplicaSet,
	/// ReplicationController, DaemonSet, StatefulSet, Job, CronJob,
	/// CloneSet, Advanced StatefulSet and Advanced DaemonSet.
	Resources(ResourcesArgs),
}

#[derive(Args, Debug)]
pub struct ResourcesArgs {
	#[command(flatten)]
	pub target: TargetArgs,

	/// The names of containers in the selected pod templates to change, all containers are selected by default - may use wildcards
	#[arg(short = 'c', long, default_value = "*")]
	pub containers: String,

	/// The resource requirement limits for this container. For example, 'cpu=200m,memory=512Mi'
	#[arg(long)]
	pub limits: Option<String>,

	/// The resource requirement requests for this container. For example, 'cpu=100m,memory=256Mi'
	#[arg(long)]
	pub requests: Option<String>,

	/// If true, set resources will NOT contact api-server but run locally
	#[arg(long)]
	pub local: bool,
}

/// Build the invocation for a set subcommand.
pub fn invocation(args: SetArgs, global: &GlobalArgs, config: &KruiseConfig) -> Result<Invocation> {
	match args.command {
		SetCommands::Resources(args) => {
			let update = ResourceUpdate::new(&args.containers, args.limits.as_deref(), args.requests.as_deref())?;
			Invocation::new(
				global,
				args.target,
				Operation::SetResources(update),
				args.local,
				config,
			)
		}
	}
}
