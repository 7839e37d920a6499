//! Wire names and record types of the dump container.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Section keys, in the order the container requires them.
pub const INDEXES_SECTION: &str = "Indexes";
pub const DOCS_SECTION: &str = "Docs";
pub const ATTACHMENTS_SECTION: &str = "Attachments";

/// Reserved document key carrying the store-assigned headers.
pub const METADATA_KEY: &str = "@metadata";
/// Write key of a document, inside its metadata.
pub const ID_KEY: &str = "@id";
/// Causality token of a revision, inside its metadata.
pub const ETAG_KEY: &str = "@etag";

/// One archived attachment: raw bytes plus the listing metadata.
///
/// `Data` is base64 inside the JSON text; the field codec keeps the in-memory
/// representation as plain bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    #[serde(rename = "Data", with = "base64_bytes")]
    pub data: Vec<u8>,
    #[serde(rename = "Metadata", default)]
    pub metadata: Map<String, Value>,
    #[serde(rename = "Key")]
    pub key: String,
}

mod base64_bytes {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text.as_bytes()).map_err(serde::de::Error::custom)
    }
}
