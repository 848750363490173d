//! `rollout pause`, `rollout resume` and `rollout restart`.

use anyhow::Result;
use clap::{Args, Subcommand};

use super::{GlobalArgs, Invocation, TargetArgs};
use crate::{config::KruiseConfig, pipeline::mutate::Operation};

#[derive(Args)]
pub struct RolloutArgs {
	#[command(subcommand)]
	pub command: RolloutCommands,
}

#[derive(Subcommand)]
pub enum RolloutCommands {
	/// Mark the provided resource as paused
	///
	/// Supported kinds: Deployment, CloneSet, Advanced StatefulSet.
	/// Paused resources will not be reconciled by a controller.
	Pause(TargetArgs),

	/// Resume a paused resource
	///
	/// Supported kinds: Deployment, CloneSet, Advanced StatefulSet.
	Resume(TargetArgs),

	/// Restart a resource
	///
	/// Supported kinds: Deployment, DaemonSet, StatefulSet, CloneSet,
	/// Advanced StatefulSet, Advanced DaemonSet. Pods are recreated by
	/// the workload's update strategy.
	Restart(TargetArgs),
}

impl RolloutArgs {
	pub fn target(&self) -> &TargetArgs {
		match &self.command {
			RolloutCommands::Pause(target)
			| RolloutCommands::Resume(target)
			| RolloutCommands::Restart(target) => target,
		}
	}
}

/// Build the invocation for a rollout subcommand.
pub fn invocation(args: RolloutArgs, global: &GlobalArgs, config: &KruiseConfig) -> Result<Invocation> {
	let (operation, target) = match args.command {
		RolloutCommands::Pause(target) => (Operation::Pause, target),
		RolloutCommands::Resume(target) => (Operation::Resume, target),
		RolloutCommands::Restart(target) => (Operation::Restart, target),
	};
	Invocation::new(global, target, operation, false, config)
}
