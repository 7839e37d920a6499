//! Streamed dump container format
//!
//! Defines the three-section (Indexes/Docs/Attachments) archive produced by
//! export and consumed by import, and provides token-level read/write APIs
//! so the whole container is never held in memory at once.

pub mod error;
pub mod reader;
pub mod record;
pub mod token;
pub mod writer;

pub use error::{DumpError, Result};
pub use reader::{DumpReader, DumpSource};
pub use record::AttachmentRecord;
pub use token::{Token, TokenReader};
pub use writer::{DumpWriter, TokenWriter};
