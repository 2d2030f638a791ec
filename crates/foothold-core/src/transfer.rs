use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::category::Category;
use crate::item::Item;

pub const EXPORT_VERSION: u32 = 1;

/// The backup file shape: `{ items, categories, version }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportDocument {
    pub items: Vec<Item>,
    pub categories: Vec<Category>,
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    EXPORT_VERSION
}

impl ExportDocument {
    pub fn new(items: Vec<Item>, categories: Vec<Category>) -> Self {
        Self {
            items,
            categories,
            version: EXPORT_VERSION,
        }
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string_pretty(self).context("failed to encode export document")
    }
}

/// Validates and decodes an import document. Anything other than an object
/// carrying both `items` and `categories` arrays fails with the same generic
/// error; the cause is only logged.
#[instrument(skip(text), fields(bytes = text.len()))]
pub fn parse_document(text: &str) -> anyhow::Result<ExportDocument> {
    let value: Value = serde_json::from_str(text.trim()).map_err(|err| {
        warn!(error = %err, "import is not valid json");
        invalid_document()
    })?;

    let has_arrays = value.get("items").is_some_and(Value::is_array)
        && value.get("categories").is_some_and(Value::is_array);
    if !has_arrays {
        warn!("import lacks items/categories arrays");
        return Err(invalid_document());
    }

    let doc: ExportDocument = serde_json::from_value(value).map_err(|err| {
        warn!(error = %err, "import entries are malformed");
        invalid_document()
    })?;
    if doc.version != EXPORT_VERSION {
        debug!(version = doc.version, "importing document with unexpected version");
    }
    Ok(doc)
}

fn invalid_document() -> anyhow::Error {
    anyhow!("invalid import document: expected an object with items and categories arrays")
}
