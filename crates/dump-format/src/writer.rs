//! Append-only token writer for the dump container.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;

use crate::error::Result;

const FILE_BUF: usize = 1 << 20;

/// Writes structural tokens as compact JSON, managing commas and colons.
///
/// The caller supplies tokens in the container shape it wants; nothing is
/// buffered beyond the underlying stream, so memory stays bounded no matter
/// how many entries flow through.
pub struct TokenWriter<W: Write> {
    w: W,
    // one flag per open container: whether it already holds an item
    stack: Vec<bool>,
    after_property: bool,
}

impl<W: Write> TokenWriter<W> {
    pub fn new(w: W) -> Self {
        Self {
            w,
            stack: Vec::new(),
            after_property: false,
        }
    }

    pub fn start_object(&mut self) -> Result<()> {
        self.separate()?;
        self.w.write_all(b"{")?;
        self.stack.push(false);
        Ok(())
    }

    pub fn end_object(&mut self) -> Result<()> {
        self.stack.pop();
        self.w.write_all(b"}")?;
        Ok(())
    }

    pub fn start_array(&mut self) -> Result<()> {
        self.separate()?;
        self.w.write_all(b"[")?;
        self.stack.push(false);
        Ok(())
    }

    pub fn end_array(&mut self) -> Result<()> {
        self.stack.pop();
        self.w.write_all(b"]")?;
        Ok(())
    }

    pub fn property(&mut self, name: &str) -> Result<()> {
        self.separate()?;
        serde_json::to_writer(&mut self.w, name)?;
        self.w.write_all(b":")?;
        self.after_property = true;
        Ok(())
    }

    /// Append one complete JSON value at the current position.
    pub fn value(&mut self, value: &Value) -> Result<()> {
        self.separate()?;
        serde_json::to_writer(&mut self.w, value)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.w.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.w
    }

    fn separate(&mut self) -> Result<()> {
        if self.after_property {
            self.after_property = false;
            return Ok(());
        }
        if let Some(has_items) = self.stack.last_mut() {
            if *has_items {
                self.w.write_all(b",")?;
            }
            *has_items = true;
        }
        Ok(())
    }
}

/// Gzip-compressed dump sink.
///
/// The file is only a valid archive once [`DumpWriter::finish`] has run: it
/// writes the gzip trailer and flushes the file buffer. Dropping the writer
/// early leaves a truncated, unreadable file behind, which is what a failed
/// export is expected to do.
pub struct DumpWriter {
    tokens: TokenWriter<GzEncoder<BufWriter<File>>>,
}

impl DumpWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        let gz = GzEncoder::new(
            BufWriter::with_capacity(FILE_BUF, file),
            Compression::default(),
        );
        Ok(Self {
            tokens: TokenWriter::new(gz),
        })
    }

    pub fn tokens(&mut self) -> &mut TokenWriter<GzEncoder<BufWriter<File>>> {
        &mut self.tokens
    }

    /// Complete the compression stream, then flush the file.
    pub fn finish(self) -> Result<()> {
        let gz = self.tokens.into_inner();
        let mut file = gz.finish()?;
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn container_bytes() -> Vec<u8> {
        let mut w = TokenWriter::new(Vec::new());
        w.start_object().unwrap();
        w.property("Indexes").unwrap();
        w.start_array().unwrap();
        w.value(&json!({"name":"ByTag","definition":{"map":"m"}}))
            .unwrap();
        w.value(&json!({"name":"Raven/All","definition":{}})).unwrap();
        w.end_array().unwrap();
        w.property("Docs").unwrap();
        w.start_array().unwrap();
        w.end_array().unwrap();
        w.property("Attachments").unwrap();
        w.start_array().unwrap();
        w.end_array().unwrap();
        w.end_object().unwrap();
        w.into_inner()
    }

    #[test]
    fn output_is_valid_json() {
        let bytes = container_bytes();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["Indexes"][0]["name"], "ByTag");
        assert_eq!(value["Docs"], json!([]));
        assert_eq!(value["Attachments"], json!([]));
    }

    #[test]
    fn commas_only_between_items() {
        let mut w = TokenWriter::new(Vec::new());
        w.start_array().unwrap();
        w.value(&json!(1)).unwrap();
        w.value(&json!(2)).unwrap();
        w.start_object().unwrap();
        w.property("a").unwrap();
        w.value(&json!(3)).unwrap();
        w.end_object().unwrap();
        w.end_array().unwrap();
        assert_eq!(w.into_inner(), br#"[1,2,{"a":3}]"#);
    }

    #[test]
    fn escaped_property_names() {
        let mut w = TokenWriter::new(Vec::new());
        w.start_object().unwrap();
        w.property("we\"ird\n").unwrap();
        w.value(&json!(null)).unwrap();
        w.end_object().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&w.into_inner()).unwrap();
        assert_eq!(value["we\"ird\n"], json!(null));
    }

    #[test]
    fn round_trips_through_the_tokenizer() {
        use crate::token::{Token, TokenReader};

        let bytes = container_bytes();
        let mut r = TokenReader::new(&bytes[..]);
        assert_eq!(r.next().unwrap(), Some(Token::StartObject));
        assert_eq!(r.next().unwrap(), Some(Token::Property("Indexes".into())));
        assert_eq!(r.next().unwrap(), Some(Token::StartArray));
        let first = r.next().unwrap().unwrap();
        let index = r.value_from(first).unwrap();
        assert_eq!(index["definition"]["map"], "m");
    }
}
