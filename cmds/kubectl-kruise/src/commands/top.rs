//! `top clone`.

use std::io::Write;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use tracing::instrument;

use super::{connect, util, GlobalArgs};
use crate::{
	config::KruiseConfig,
	k8s::client::ConnectionOptions,
	top::{collect_usage, print_usage, SortBy, TopOptions},
};

#[derive(Args)]
pub struct TopArgs {
	#[command(subcommand)]
	pub command: TopCommands,
}

#[derive(Subcommand)]
pub enum TopCommands {
	/// Display resource (CPU/memory) usage of the pods a CloneSet owns
	///
	/// Requires the metrics API (metrics-server) on the cluster.
	#[command(visible_aliases = ["cloneset", "clonesets"])]
	Clone(TopCloneArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct TopCloneArgs {
	/// CloneSet name. Every CloneSet in the namespace when omitted
	pub name: Option<String>,

	/// Selector (label query) to filter CloneSets on, e.g. -l key1=value1,key2=value2
	#[arg(short = 'l', long)]
	pub selector: Option<String>,

	/// Sort pods by cpu or memory usage, highest first
	#[arg(long, value_enum)]
	pub sort_by: Option<SortBy>,

	/// List CloneSets across all namespaces
	#[arg(short = 'A', long)]
	pub all_namespaces: bool,

	/// Print output without headers
	#[arg(long)]
	pub no_headers: bool,
}

/// Validate, connect, and print the usage table to `writer`.
///
/// "No resources found" goes to stderr, as kubectl does.
#[instrument(skip_all)]
pub fn run<W: Write>(args: TopArgs, global: &GlobalArgs, config: &KruiseConfig, writer: W) -> Result<()> {
	let TopCommands::Clone(args) = args.command;
	let mut opts = TopOptions {
		name: args.name,
		selector: args.selector,
		all_namespaces: args.all_namespaces,
		sort_by: args.sort_by,
		no_headers: args.no_headers,
		..Default::default()
	};
	opts.validate()?;

	let connection = global.connection_options(config);
	let runtime = util::create_runtime()?;
	runtime.block_on(top_clone(&connection, &mut opts, writer))
}

async fn top_clone<W: Write>(connection: &ConnectionOptions, opts: &mut TopOptions, writer: W) -> Result<()> {
	let (store, scope) = connect(connection).await?;
	opts.namespace = scope.namespace;

	let usage = collect_usage(&store, opts)
		.await
		.context("collecting CloneSet pod metrics")?;
	if usage.is_empty() {
		if opts.all_namespaces {
			eprintln!("No resources found");
		} else {
			eprintln!("No resources found in {} namespace.", opts.namespace);
		}
		return Ok(());
	}
	print_usage(writer, &usage, opts)?;
	Ok(())
}
