//! Utilities for command handlers.

use std::{
	io::{self, ErrorKind, Write},
	time::Duration,
};

use anyhow::{bail, Context, Result};

/// A writer wrapper that silently handles broken pipe errors.
///
/// Lets `kubectl-kruise rollout restart cs -o name | head -1` exit cleanly.
pub struct BrokenPipeGuard<W> {
	inner: W,
}

impl<W> BrokenPipeGuard<W> {
	pub fn new(inner: W) -> Self {
		Self { inner }
	}
}

impl<W: Write> Write for BrokenPipeGuard<W> {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		match self.inner.write(buf) {
			Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(buf.len()),
			other => other,
		}
	}

	fn flush(&mut self) -> io::Result<()> {
		match self.inner.flush() {
			Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
			other => other,
		}
	}
}

/// Parse a `--request-timeout` value: a bare number of seconds or a number
/// with an `ms`, `s`, `m` or `h` suffix.
pub fn parse_timeout(input: &str) -> Result<Duration> {
	let input = input.trim();
	let split = input
		.find(|c: char| !c.is_ascii_digit())
		.unwrap_or(input.len());
	let (number, unit) = input.split_at(split);
	let value: u64 = number
		.parse()
		.with_context(|| format!("invalid timeout value \"{input}\""))?;

	let duration = match unit {
		"" | "s" => Duration::from_secs(value),
		"ms" => Duration::from_millis(value),
		"m" => Duration::from_secs(value * 60),
		"h" => Duration::from_secs(value * 3600),
		other => bail!("invalid timeout unit \"{other}\" in \"{input}\""),
	};
	Ok(duration)
}

/// Runtime for the command. Resources are processed one after another, so a
/// single thread is enough.
pub fn create_runtime() -> Result<tokio::runtime::Runtime> {
	tokio::runtime::Builder::new_current_thread()
		.enable_all()
		.build()
		.context("creating tokio runtime")
}
