use std::path::PathBuf;

use anyhow::{bail, Result};

/// Page size for every listing endpoint.
pub const DEFAULT_PAGE_SIZE: usize = 128;
/// Documents per bulk write during import.
pub const DEFAULT_BATCH_SIZE: usize = 128;
/// Index namespaces owned by the server; never written back on import.
pub const RESERVED_INDEX_PREFIXES: [&str; 2] = ["Raven/", "Temp/"];

/// Fixed knobs of a transfer, passed into the pipelines.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub page_size: usize,
    pub batch_size: usize,
    pub reserved_index_prefixes: &'static [&'static str],
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            reserved_index_prefixes: &RESERVED_INDEX_PREFIXES,
        }
    }
}

impl TransferConfig {
    pub fn is_reserved_index(&self, name: &str) -> bool {
        self.reserved_index_prefixes
            .iter()
            .any(|prefix| name.starts_with(prefix))
    }
}

/// What to export and where to put it. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct ExportSpec {
    pub url: String,
    pub archive_path: PathBuf,
    pub indexes_only: bool,
    pub include_attachments: bool,
}

impl ExportSpec {
    pub fn new(
        url: &str,
        archive_path: impl Into<PathBuf>,
        indexes_only: bool,
        include_attachments: bool,
    ) -> Result<Self> {
        Ok(Self {
            url: normalize_url(url)?,
            archive_path: archive_path.into(),
            indexes_only,
            include_attachments,
        })
    }
}

/// Instance URLs always carry a trailing slash so endpoint paths append cleanly.
pub fn normalize_url(url: &str) -> Result<String> {
    if url.is_empty() {
        bail!("instance URL must not be empty");
    }
    if url.ends_with('/') {
        Ok(url.to_string())
    } else {
        Ok(format!("{url}/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_missing_trailing_slash() {
        assert_eq!(normalize_url("http://localhost:8080").unwrap(), "http://localhost:8080/");
        assert_eq!(normalize_url("http://localhost:8080/").unwrap(), "http://localhost:8080/");
    }

    #[test]
    fn rejects_empty_url() {
        assert!(normalize_url("").is_err());
        assert!(ExportSpec::new("", "dump", false, false).is_err());
    }

    #[test]
    fn reserved_prefixes() {
        let config = TransferConfig::default();
        assert!(config.is_reserved_index("Raven/DocumentsByEntityName"));
        assert!(config.is_reserved_index("Temp/Scratch"));
        assert!(!config.is_reserved_index("Orders/ByCustomer"));
        assert!(!config.is_reserved_index("raven/lowercase"));
    }
}
