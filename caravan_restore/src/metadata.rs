use std::fs;
use std::path::Path;

use caravan_document::{Document, Value, document_from_json};
use snafu::ResultExt;

use crate::error::{MetadataSnafu, ReadFileSnafu, Result};

/// A collection's sidecar metadata: creation options plus index
/// specifications, stored as one JSON object per collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionMetadata {
    pub options: Document,
    pub indexes: Vec<Document>,
}

/// Reads and interprets a `<collection>.metadata.json` file.
pub fn read_metadata_file(path: &Path) -> Result<CollectionMetadata> {
    let raw = fs::read_to_string(path).context(ReadFileSnafu { path })?;
    let parsed: serde_json::Value = serde_json::from_str(&raw).map_err(|error| {
        MetadataSnafu {
            path,
            message: error.to_string(),
        }
        .build()
    })?;
    let document = document_from_json(parsed).map_err(|error| {
        MetadataSnafu {
            path,
            message: error.to_string(),
        }
        .build()
    })?;

    let options = document
        .get("options")
        .and_then(Value::as_document)
        .cloned()
        .unwrap_or_default();
    let indexes = match document.get("indexes") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_document().cloned())
            .collect(),
        _ => Vec::new(),
    };

    Ok(CollectionMetadata { options, indexes })
}
