//! Dump source with dual-mode compression detection and grammar helpers.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use flate2::read::GzDecoder;
use serde_json::Value;

use crate::error::{DumpError, Result};
use crate::token::{Token, TokenReader};

const FILE_BUF: usize = 1 << 20;

/// Underlying byte source of an open dump, gzip or plain.
pub enum DumpSource {
    Gzip(GzDecoder<BufReader<File>>),
    Plain(BufReader<File>),
}

impl Read for DumpSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            DumpSource::Gzip(r) => r.read(buf),
            DumpSource::Plain(r) => r.read(buf),
        }
    }
}

/// Pull-style reader over a dump file.
///
/// Wraps the tokenizer with expectation helpers whose errors name the
/// construct the container grammar required, so a malformed archive fails
/// with a message like `expected PropertyName "Docs", found EndObject`.
pub struct DumpReader {
    tokens: TokenReader<BufReader<DumpSource>>,
}

impl DumpReader {
    /// Open a dump, probing for gzip exactly once.
    ///
    /// The probe attempts one decompressed read; an invalid-stream error
    /// rewinds to the start and re-opens the file as plain text. A genuine
    /// I/O failure propagates instead of falling back.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let compressed = probe_gzip(&mut file)?;
        file.seek(SeekFrom::Start(0))?;
        let buffered = BufReader::with_capacity(FILE_BUF, file);
        let source = if compressed {
            DumpSource::Gzip(GzDecoder::new(buffered))
        } else {
            DumpSource::Plain(buffered)
        };
        Ok(Self {
            tokens: TokenReader::new(BufReader::with_capacity(FILE_BUF, source)),
        })
    }

    pub fn next_token(&mut self) -> Result<Option<Token>> {
        self.tokens.next()
    }

    pub fn expect_object_start(&mut self) -> Result<()> {
        match self.tokens.next()? {
            Some(Token::StartObject) => Ok(()),
            other => Err(DumpError::expected("StartObject", describe(&other))),
        }
    }

    pub fn expect_property(&mut self, name: &str) -> Result<()> {
        match self.tokens.next()? {
            Some(Token::Property(found)) if found == name => Ok(()),
            other => Err(DumpError::expected(
                format!("PropertyName \"{name}\""),
                describe(&other),
            )),
        }
    }

    pub fn expect_array_start(&mut self) -> Result<()> {
        match self.tokens.next()? {
            Some(Token::StartArray) => Ok(()),
            other => Err(DumpError::expected("StartArray", describe(&other))),
        }
    }

    /// Next entry of the current array, or `None` once it closes.
    pub fn next_array_element(&mut self) -> Result<Option<Value>> {
        match self.tokens.next()? {
            Some(Token::EndArray) => Ok(None),
            Some(tok) => Ok(Some(self.tokens.value_from(tok)?)),
            None => Err(DumpError::expected("EndArray", "end of stream")),
        }
    }

    /// Consume `PropertyName name` if the container continues, `false` if it
    /// ends here (closing brace or end of stream). Legacy dumps stop after
    /// the Docs array.
    pub fn optional_property(&mut self, name: &str) -> Result<bool> {
        match self.tokens.next()? {
            None | Some(Token::EndObject) => Ok(false),
            Some(Token::Property(found)) if found == name => Ok(true),
            other => Err(DumpError::expected(
                format!("PropertyName \"{name}\" or EndObject"),
                describe(&other),
            )),
        }
    }
}

fn describe(token: &Option<Token>) -> String {
    match token {
        Some(tok) => tok.to_string(),
        None => "end of stream".to_string(),
    }
}

fn probe_gzip(file: &mut File) -> Result<bool> {
    let mut decoder = GzDecoder::new(BufReader::new(&mut *file));
    let mut first = [0u8; 1];
    match decoder.read(&mut first) {
        Ok(_) => Ok(true),
        Err(e)
            if matches!(
                e.kind(),
                ErrorKind::InvalidInput | ErrorKind::InvalidData | ErrorKind::UnexpectedEof
            ) =>
        {
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}
