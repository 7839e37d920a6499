//! Pull-based JSON tokenizer for the dump container.
//!
//! The container is one JSON document far larger than memory, so it is
//! consumed as a lazy stream of structural tokens rather than parsed whole.
//! The tokenizer tracks the container stack itself: property names arrive as
//! [`Token::Property`] (with the following `:` already consumed) and commas
//! are swallowed, so consumers only ever see meaningful tokens.

use std::fmt;
use std::io::BufRead;

use serde_json::{Map, Number, Value};

use crate::error::{DumpError, Result};

/// One structural token or scalar of the dump stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    StartObject,
    EndObject,
    StartArray,
    EndArray,
    /// An object key, colon consumed
    Property(String),
    String(String),
    Number(Number),
    Bool(bool),
    Null,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::StartObject => write!(f, "StartObject"),
            Token::EndObject => write!(f, "EndObject"),
            Token::StartArray => write!(f, "StartArray"),
            Token::EndArray => write!(f, "EndArray"),
            Token::Property(name) => write!(f, "PropertyName \"{name}\""),
            Token::String(_) => write!(f, "String"),
            Token::Number(_) => write!(f, "Number"),
            Token::Bool(_) => write!(f, "Boolean"),
            Token::Null => write!(f, "Null"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Container {
    Object,
    Array,
}

/// Where the grammar stands between two tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    /// A value is required (root start, after a property, after `,` in an array)
    Value,
    /// Just after `[`: a value or `]`
    ArrayFirst,
    /// Just after `{`: a key or `}`
    ObjectFirst,
    /// After `,` inside an object: a key is required
    Key,
    /// A value just completed inside a container: `,` or the closer
    PostValue,
    /// The root value is complete
    Done,
}

/// Streaming token reader over any buffered byte source.
///
/// `next` yields `Ok(None)` at a clean end of input between tokens; grammar
/// truncation is reported by the consumer, which knows what it expected.
pub struct TokenReader<R> {
    r: R,
    stack: Vec<Container>,
    mode: Mode,
}

impl<R: BufRead> TokenReader<R> {
    pub fn new(r: R) -> Self {
        Self {
            r,
            stack: Vec::new(),
            mode: Mode::Value,
        }
    }

    /// Pull the next token, or `None` at end of stream.
    pub fn next(&mut self) -> Result<Option<Token>> {
        loop {
            self.skip_whitespace()?;
            let byte = match self.peek_byte()? {
                Some(b) => b,
                // end of input between tokens; a consumer that still expected
                // a construct reports it by name
                None => return Ok(None),
            };
            match self.mode {
                Mode::Done => {
                    return Err(DumpError::Syntax(format!(
                        "trailing character {:?} after top-level value",
                        byte as char
                    )));
                }
                Mode::Value | Mode::ArrayFirst => {
                    if byte == b']' && self.mode == Mode::ArrayFirst {
                        self.bump();
                        self.stack.pop();
                        self.value_done();
                        return Ok(Some(Token::EndArray));
                    }
                    return self.read_value_token(byte).map(Some);
                }
                Mode::ObjectFirst | Mode::Key => {
                    if byte == b'}' && self.mode == Mode::ObjectFirst {
                        self.bump();
                        self.stack.pop();
                        self.value_done();
                        return Ok(Some(Token::EndObject));
                    }
                    if byte != b'"' {
                        return Err(DumpError::Syntax(format!(
                            "expected property name, found {:?}",
                            byte as char
                        )));
                    }
                    let name = self.read_string()?;
                    self.skip_whitespace()?;
                    match self.peek_byte()? {
                        Some(b':') => self.bump(),
                        Some(other) => {
                            return Err(DumpError::Syntax(format!(
                                "expected ':' after property name, found {:?}",
                                other as char
                            )));
                        }
                        None => {
                            return Err(DumpError::Syntax(
                                "expected ':' after property name, found end of stream".into(),
                            ));
                        }
                    }
                    self.mode = Mode::Value;
                    return Ok(Some(Token::Property(name)));
                }
                Mode::PostValue => {
                    let closer = match self.stack.last() {
                        Some(Container::Object) => b'}',
                        Some(Container::Array) => b']',
                        None => {
                            return Err(DumpError::Syntax(
                                "value separator outside any container".into(),
                            ));
                        }
                    };
                    if byte == b',' {
                        self.bump();
                        self.mode = if closer == b'}' { Mode::Key } else { Mode::Value };
                        continue;
                    }
                    if byte == closer {
                        self.bump();
                        let closed = self.stack.pop();
                        self.value_done();
                        return Ok(Some(match closed {
                            Some(Container::Object) => Token::EndObject,
                            _ => Token::EndArray,
                        }));
                    }
                    return Err(DumpError::Syntax(format!(
                        "expected ',' or {:?}, found {:?}",
                        closer as char, byte as char
                    )));
                }
            }
        }
    }

    /// Assemble one complete JSON value from the stream, starting at `tok`.
    ///
    /// Used for entry-level reads (an index, a document, an attachment
    /// record); the value is bounded by one entry, not the whole dump.
    pub fn value_from(&mut self, tok: Token) -> Result<Value> {
        match tok {
            Token::String(s) => Ok(Value::String(s)),
            Token::Number(n) => Ok(Value::Number(n)),
            Token::Bool(b) => Ok(Value::Bool(b)),
            Token::Null => Ok(Value::Null),
            Token::StartArray => {
                let mut items = Vec::new();
                loop {
                    match self.next()? {
                        Some(Token::EndArray) => return Ok(Value::Array(items)),
                        Some(tok) => items.push(self.value_from(tok)?),
                        None => {
                            return Err(DumpError::expected("EndArray", "end of stream"));
                        }
                    }
                }
            }
            Token::StartObject => {
                let mut members = Map::new();
                loop {
                    match self.next()? {
                        Some(Token::EndObject) => return Ok(Value::Object(members)),
                        Some(Token::Property(name)) => {
                            let value = match self.next()? {
                                Some(tok) => self.value_from(tok)?,
                                None => {
                                    return Err(DumpError::expected("a value", "end of stream"));
                                }
                            };
                            members.insert(name, value);
                        }
                        Some(other) => {
                            return Err(DumpError::expected("PropertyName", other.to_string()));
                        }
                        None => {
                            return Err(DumpError::expected("EndObject", "end of stream"));
                        }
                    }
                }
            }
            other => Err(DumpError::expected("a value", other.to_string())),
        }
    }

    fn read_value_token(&mut self, byte: u8) -> Result<Token> {
        match byte {
            b'{' => {
                self.bump();
                self.stack.push(Container::Object);
                self.mode = Mode::ObjectFirst;
                Ok(Token::StartObject)
            }
            b'[' => {
                self.bump();
                self.stack.push(Container::Array);
                self.mode = Mode::ArrayFirst;
                Ok(Token::StartArray)
            }
            b'"' => {
                let text = self.read_string()?;
                self.value_done();
                Ok(Token::String(text))
            }
            b'-' | b'0'..=b'9' => {
                let number = self.read_number()?;
                self.value_done();
                Ok(Token::Number(number))
            }
            b't' => {
                self.read_literal(b"true")?;
                self.value_done();
                Ok(Token::Bool(true))
            }
            b'f' => {
                self.read_literal(b"false")?;
                self.value_done();
                Ok(Token::Bool(false))
            }
            b'n' => {
                self.read_literal(b"null")?;
                self.value_done();
                Ok(Token::Null)
            }
            other => Err(DumpError::Syntax(format!(
                "expected a value, found {:?}",
                other as char
            ))),
        }
    }

    fn value_done(&mut self) {
        self.mode = if self.stack.is_empty() {
            Mode::Done
        } else {
            Mode::PostValue
        };
    }

    fn read_string(&mut self) -> Result<String> {
        self.bump(); // opening quote
        let mut out = Vec::new();
        loop {
            let byte = self
                .next_byte()?
                .ok_or_else(|| DumpError::Syntax("unterminated string".into()))?;
            match byte {
                b'"' => break,
                b'\\' => {
                    let escape = self
                        .next_byte()?
                        .ok_or_else(|| DumpError::Syntax("unterminated escape".into()))?;
                    match escape {
                        b'"' => out.push(b'"'),
                        b'\\' => out.push(b'\\'),
                        b'/' => out.push(b'/'),
                        b'b' => out.push(0x08),
                        b'f' => out.push(0x0c),
                        b'n' => out.push(b'\n'),
                        b'r' => out.push(b'\r'),
                        b't' => out.push(b'\t'),
                        b'u' => {
                            let ch = self.read_unicode_escape()?;
                            let mut buf = [0u8; 4];
                            out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                        }
                        other => {
                            return Err(DumpError::Syntax(format!(
                                "invalid escape character {:?}",
                                other as char
                            )));
                        }
                    }
                }
                other => out.push(other),
            }
        }
        String::from_utf8(out).map_err(|_| DumpError::Syntax("invalid utf-8 in string".into()))
    }

    fn read_unicode_escape(&mut self) -> Result<char> {
        let first = self.read_hex4()?;
        // surrogate pairs arrive as two consecutive \uXXXX escapes
        let code = match first {
            0xD800..=0xDBFF => {
                if self.next_byte()? != Some(b'\\') || self.next_byte()? != Some(b'u') {
                    return Err(DumpError::Syntax("unpaired surrogate escape".into()));
                }
                let low = self.read_hex4()?;
                if !(0xDC00..=0xDFFF).contains(&low) {
                    return Err(DumpError::Syntax("invalid low surrogate escape".into()));
                }
                0x10000 + ((u32::from(first) - 0xD800) << 10) + (u32::from(low) - 0xDC00)
            }
            0xDC00..=0xDFFF => {
                return Err(DumpError::Syntax("unpaired surrogate escape".into()));
            }
            other => u32::from(other),
        };
        char::from_u32(code).ok_or_else(|| DumpError::Syntax("invalid unicode escape".into()))
    }

    fn read_hex4(&mut self) -> Result<u16> {
        let mut code: u16 = 0;
        for _ in 0..4 {
            let byte = self
                .next_byte()?
                .ok_or_else(|| DumpError::Syntax("unterminated unicode escape".into()))?;
            let digit = (byte as char)
                .to_digit(16)
                .ok_or_else(|| DumpError::Syntax("invalid unicode escape digit".into()))?;
            code = code << 4 | digit as u16;
        }
        Ok(code)
    }

    fn read_number(&mut self) -> Result<Number> {
        let mut buf = Vec::new();
        while let Some(byte) = self.peek_byte()? {
            match byte {
                b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E' => {
                    buf.push(byte);
                    self.bump();
                }
                _ => break,
            }
        }
        let text = std::str::from_utf8(&buf)
            .map_err(|_| DumpError::Syntax("invalid number".into()))?;
        if let Ok(n) = text.parse::<i64>() {
            return Ok(Number::from(n));
        }
        if let Ok(n) = text.parse::<u64>() {
            return Ok(Number::from(n));
        }
        let float = text
            .parse::<f64>()
            .map_err(|_| DumpError::Syntax(format!("invalid number {text:?}")))?;
        Number::from_f64(float)
            .ok_or_else(|| DumpError::Syntax(format!("non-finite number {text:?}")))
    }

    fn read_literal(&mut self, literal: &[u8]) -> Result<()> {
        for &expected in literal {
            match self.next_byte()? {
                Some(byte) if byte == expected => {}
                _ => {
                    return Err(DumpError::Syntax(format!(
                        "invalid literal, expected {:?}",
                        String::from_utf8_lossy(literal)
                    )));
                }
            }
        }
        Ok(())
    }

    fn skip_whitespace(&mut self) -> Result<()> {
        while let Some(byte) = self.peek_byte()? {
            match byte {
                b' ' | b'\t' | b'\r' | b'\n' => self.bump(),
                _ => break,
            }
        }
        Ok(())
    }

    fn peek_byte(&mut self) -> Result<Option<u8>> {
        Ok(self.r.fill_buf()?.first().copied())
    }

    fn next_byte(&mut self) -> Result<Option<u8>> {
        let byte = self.peek_byte()?;
        if byte.is_some() {
            self.bump();
        }
        Ok(byte)
    }

    fn bump(&mut self) {
        self.r.consume(1);
    }
}
