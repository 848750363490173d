use std::process::ExitCode;

use clap::Parser;
use kubectl_kruise::{
	commands::{self, util::BrokenPipeGuard, Cli},
	pipeline::error::AggregatedError,
	telemetry,
};

#[cfg(all(
	target_os = "linux",
	feature = "mimalloc",
	not(feature = "system-alloc")
))]
#[global_allocator]
static GLOBAL: mimallocator::Mimalloc = mimallocator::Mimalloc;

fn main() -> ExitCode {
	let cli = Cli::parse();

	let _telemetry = match telemetry::init(cli.global.log_level) {
		Ok(guard) => Some(guard),
		Err(e) => {
			eprintln!("warning: telemetry disabled: {e:#}");
			None
		}
	};

	let stdout = BrokenPipeGuard::new(std::io::stdout());

	match commands::run(cli, stdout) {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => {
			match err.downcast_ref::<AggregatedError>() {
				Some(errors) => {
					for line in errors.lines() {
						eprintln!("error: {line}");
					}
				}
				None => eprintln!("error: {err:#}"),
			}
			ExitCode::FAILURE
		}
	}
}
