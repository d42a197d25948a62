//! Metadata sidecar records
//!
//! Stored as JSON next to the payload in `<identifier>.metadata`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Auxiliary attributes of a stored object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_size: u64,
    /// Caller-defined attributes, kept verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BinaryMetadata {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, file_size: u64) -> Self {
        Self {
            file_name: Some(file_name.into()),
            mime_type: Some(mime_type.into()),
            file_size,
            extra: Map::new(),
        }
    }
}
