//! Fixtures: sample model directories and run requests.

use crate::run::RunRequest;
use std::io;
use std::path::{Path, PathBuf};

/// Files written by [`write_model_dir`], as `(relative path, contents)`.
pub const MODEL_FILES: &[(&str, &str)] = &[
    ("config.json", r#"{"architecture":"tiny","layers":2}"#),
    ("model.safetensors", "weights-0123456789abcdef"),
    ("tokenizer/vocab.txt", "hello\nworld\n"),
];

/// Writes a small model directory under `parent` and returns its path.
///
/// # Errors
///
/// Returns an error if a file cannot be written.
pub fn write_model_dir(parent: &Path) -> io::Result<PathBuf> {
    let root = parent.join("model");
    for (relative, contents) in MODEL_FILES {
        let path = root.join(relative);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, contents)?;
    }
    Ok(root)
}

/// A run request for the standard delivery parameters.
#[must_use]
pub fn delivery_request(hub_model: &str, model_name: &str) -> RunRequest {
    RunRequest::new()
        .with_parameter("hub_model", hub_model)
        .with_parameter("model_name", model_name)
}
