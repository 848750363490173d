//! Result lines and object output.

use std::io::Write;

use clap::ValueEnum;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutputError {
	#[error("writing output")]
	Write(#[from] std::io::Error),

	#[error("encoding object as JSON")]
	Json(#[source] serde_json::Error),

	#[error("encoding object as YAML")]
	Yaml(#[source] serde_yaml_with_quirks::Error),
}

/// How each processed resource is reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
	/// `kind/name verb` lines.
	#[default]
	Name,
	Json,
	Yaml,
}

/// Writes one entry per resource, flushing after each so results stream.
pub struct ResourcePrinter<W> {
	out: W,
	format: OutputFormat,
	suffix: &'static str,
}

impl<W: Write> ResourcePrinter<W> {
	/// `suffix` is appended to every verb, e.g. ` (dry run)`.
	pub fn new(out: W, format: OutputFormat, suffix: &'static str) -> Self {
		Self { out, format, suffix }
	}

	pub fn print(&mut self, object_name: &str, object: &Value, verb: &str) -> Result<(), OutputError> {
		match self.format {
			OutputFormat::Name => writeln!(self.out, "{object_name} {verb}{}", self.suffix)?,
			OutputFormat::Json => {
				serde_json::to_writer_pretty(&mut self.out, object).map_err(OutputError::Json)?;
				writeln!(self.out)?;
			}
			OutputFormat::Yaml => {
				let yaml = serde_yaml_with_quirks::to_string(object).map_err(OutputError::Yaml)?;
				self.out.write_all(yaml.as_bytes())?;
				if !yaml.ends_with('\n') {
					writeln!(self.out)?;
				}
			}
		}
		self.out.flush()?;
		Ok(())
	}

	pub fn into_inner(self) -> W {
		self.out
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn test_name_lines() {
		let mut printer = ResourcePrinter::new(Vec::new(), OutputFormat::Name, " (dry run)");
		printer
			.print("cloneset.apps.kruise.io/a", &json!({}), "paused")
			.unwrap();
		printer
			.print("deployment.apps/b", &json!({}), "already paused")
			.unwrap();

		assert_eq!(
			String::from_utf8(printer.into_inner()).unwrap(),
			"cloneset.apps.kruise.io/a paused (dry run)\ndeployment.apps/b already paused (dry run)\n"
		);
	}

	#[test]
	fn test_json_output() {
		let mut printer = ResourcePrinter::new(Vec::new(), OutputFormat::Json, "");
		let object = json!({"kind": "CloneSet", "metadata": {"name": "a"}});
		printer.print("cloneset.apps.kruise.io/a", &object, "paused").unwrap();

		let printed: Value = serde_json::from_slice(&printer.into_inner()).unwrap();
		assert_eq!(printed, object);
	}

	#[test]
	fn test_yaml_output() {
		let mut printer = ResourcePrinter::new(Vec::new(), OutputFormat::Yaml, "");
		let object = json!({"kind": "CloneSet", "metadata": {"name": "a"}});
		printer.print("cloneset.apps.kruise.io/a", &object, "paused").unwrap();

		let output = String::from_utf8(printer.into_inner()).unwrap();
		let printed: Value = serde_yaml_with_quirks::from_str(&output).unwrap();
		assert_eq!(printed, object);
	}
}
