//! Loading objects from `-f` manifests.
//!
//! Files may hold YAML (multiple documents separated by `---`) or JSON.
//! `List` objects are flattened into their items.

use std::{
	fs,
	io::{self, Read},
	path::{Path, PathBuf},
};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;
use walkdir::WalkDir;

/// File name standing for standard input.
pub const STDIN: &str = "-";

const MANIFEST_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

#[derive(Debug, Error)]
pub enum ManifestError {
	#[error("failed to read {path}")]
	Read {
		path: String,
		#[source]
		source: io::Error,
	},

	#[error("failed to walk {path}")]
	Walk {
		path: String,
		#[source]
		source: walkdir::Error,
	},

	#[error("error parsing {path}")]
	Parse {
		path: String,
		#[source]
		source: serde_yaml_with_quirks::Error,
	},

	#[error("error parsing {path}: document {index} is not an object")]
	NotAnObject { path: String, index: usize },

	#[error("the path \"{0}\" does not exist")]
	NotFound(String),
}

/// An object read from a manifest, with the file it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
	pub source: String,
	pub object: Value,
}

/// Load every object named by `filenames`.
///
/// Directories contribute their `.yaml`, `.yml` and `.json` files, sorted by
/// name. Subdirectories are only entered when `recursive` is set. A file that
/// cannot be read or parsed yields one error in place of its objects; the
/// other files are still loaded.
#[instrument(skip_all, fields(inputs = filenames.len(), recursive))]
pub fn load(filenames: &[String], recursive: bool) -> Vec<Result<Manifest, ManifestError>> {
	let mut results = Vec::new();
	let mut push_file = |loaded: Result<Vec<Manifest>, ManifestError>| match loaded {
		Ok(manifests) => results.extend(manifests.into_iter().map(Ok)),
		Err(err) => results.push(Err(err)),
	};

	for name in filenames {
		if name == STDIN {
			push_file(load_stdin());
			continue;
		}

		let path = Path::new(name);
		if !path.exists() {
			push_file(Err(ManifestError::NotFound(name.clone())));
			continue;
		}
		for file in collect_files(path, recursive) {
			push_file(file.and_then(|file| load_file(&file)));
		}
	}

	tracing::debug!(count = results.len(), "loaded manifests");
	results
}

fn load_stdin() -> Result<Vec<Manifest>, ManifestError> {
	let mut content = String::new();
	io::stdin()
		.read_to_string(&mut content)
		.map_err(|source| ManifestError::Read {
			path: "STDIN".to_string(),
			source,
		})?;
	parse_documents("STDIN", &content)
}

fn load_file(path: &Path) -> Result<Vec<Manifest>, ManifestError> {
	let display = path.display().to_string();
	let content = fs::read_to_string(path).map_err(|source| ManifestError::Read {
		path: display.clone(),
		source,
	})?;
	parse_documents(&display, &content)
}

/// Files to load for one `-f` argument. A file named directly is always
/// loaded, whatever its extension.
fn collect_files(path: &Path, recursive: bool) -> Vec<Result<PathBuf, ManifestError>> {
	WalkDir::new(path)
		.follow_links(true)
		.max_depth(if recursive { usize::MAX } else { 1 })
		.sort_by_file_name()
		.into_iter()
		.filter_map(|entry| match entry {
			Ok(entry) if !entry.file_type().is_file() => None,
			Ok(entry) if entry.depth() > 0 && !has_manifest_extension(entry.path()) => None,
			Ok(entry) => Some(Ok(entry.into_path())),
			Err(source) => Some(Err(ManifestError::Walk {
				path: source
					.path()
					.unwrap_or(path)
					.display()
					.to_string(),
				source,
			})),
		})
		.collect()
}

fn has_manifest_extension(path: &Path) -> bool {
	path.extension()
		.and_then(|ext| ext.to_str())
		.is_some_and(|ext| MANIFEST_EXTENSIONS.contains(&ext))
}

/// Parse a manifest stream into objects.
pub fn parse_documents(source: &str, content: &str) -> Result<Vec<Manifest>, ManifestError> {
	let mut manifests = Vec::new();

	for (index, document) in serde_yaml_with_quirks::Deserializer::from_str(content).enumerate() {
		// The first error ends the stream.
		let value = Value::deserialize(document).map_err(|err| ManifestError::Parse {
			path: source.to_string(),
			source: err,
		})?;
		match value {
			Value::Null => {}
			Value::Object(_) => flatten(value, &mut |object| {
				manifests.push(Manifest {
					source: source.to_string(),
					object,
				})
			}),
			_ => {
				return Err(ManifestError::NotAnObject {
					path: source.to_string(),
					index,
				})
			}
		}
	}

	Ok(manifests)
}

fn flatten(value: Value, push: &mut impl FnMut(Value)) {
	let is_list = value
		.get("kind")
		.and_then(Value::as_str)
		.is_some_and(|kind| kind.ends_with("List"));

	match value {
		Value::Object(mut map) if is_list && map.get("items").is_some_and(Value::is_array) => {
			if let Some(Value::Array(items)) = map.remove("items") {
				for item in items {
					flatten(item, push);
				}
			}
		}
		other => push(other),
	}
}
