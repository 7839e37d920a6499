use thiserror::Error;

/// Dump format error types
#[derive(Error, Debug)]
pub enum DumpError {
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A structural token other than the one the container grammar requires
    #[error("malformed dump: expected {expected}, found {found}")]
    UnexpectedToken { expected: String, found: String },

    /// Byte-level JSON syntax error
    #[error("malformed dump: {0}")]
    Syntax(String),
}

impl DumpError {
    pub(crate) fn expected(expected: impl Into<String>, found: impl Into<String>) -> Self {
        DumpError::UnexpectedToken {
            expected: expected.into(),
            found: found.into(),
        }
    }
}

/// Result type alias for dump operations
pub type Result<T> = std::result::Result<T, DumpError>;
