//! Input/output helpers.
//!
//! - job files (`job`)
//! - logic tree documents and source files (this module)
//! - curve and map exports (`export`)

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::de::DeserializeOwned;

use crate::domain::SourceItem;
use crate::error::AppError;
use crate::tree::TreeDocument;

pub mod export;
pub mod job;

pub use export::*;
pub use job::load_job;

/// Read and deserialize a JSON file; `what` names it in error messages.
pub fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open {what} '{}': {e}", path.display())))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| AppError::new(2, format!("Invalid {what} '{}': {e}", path.display())))
}

/// Read a logic tree document.
pub fn read_tree_document(path: &Path) -> Result<TreeDocument, AppError> {
    let mut doc: TreeDocument = read_json(path, "logic tree")?;
    if doc.name.is_empty() {
        doc.name = path.display().to_string();
    }
    Ok(doc)
}

/// Read a sources file: `{"<model name>": [SourceItem, ...], ...}`.
pub fn read_sources(path: &Path) -> Result<BTreeMap<String, Vec<SourceItem>>, AppError> {
    let sources: BTreeMap<String, Vec<SourceItem>> = read_json(path, "sources file")?;
    for (model, items) in &sources {
        if let Some(bad) = items.iter().find(|s| {
            !(s.min_magnitude.is_finite()
                && s.max_magnitude.is_finite()
                && s.min_magnitude <= s.max_magnitude)
        }) {
            return Err(AppError::new(
                2,
                format!(
                    "Invalid sources file '{}': source '{}' of '{model}' has magnitude range [{}, {}]",
                    path.display(),
                    bad.id,
                    bad.min_magnitude,
                    bad.max_magnitude
                ),
            ));
        }
    }
    Ok(sources)
}
