//! Exclusive-lower-bound cursor paging over an unbounded collection.

use std::fmt;

use anyhow::Result;

/// Opaque causality token assigned by the store to every revision.
///
/// Totally ordered by the server; the client only ever threads it back as a
/// cursor and never interprets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Etag(String);

impl Etag {
    /// Cursor preceding every real token; the wire rendering of an all-zero GUID.
    pub fn zero() -> Self {
        Etag("00000000-0000-0000-0000-000000000000".to_string())
    }

    pub fn new(token: impl Into<String>) -> Self {
        Etag(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Etag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fetch pages until one comes back empty, handing each to `on_page`.
///
/// The cursor advances to the token of the *last* element of each page, an
/// exclusive lower bound for the next fetch; the token space need not be
/// contiguous, so a running counter would skip or repeat. Returns the total
/// element count. Elements rewritten concurrently with the scan are missed;
/// exactly-once holds only under a quiescent source.
pub fn drain_pages<T, F, C, H>(
    page_size: usize,
    mut fetch: F,
    mut cursor_of: C,
    mut on_page: H,
) -> Result<u64>
where
    F: FnMut(usize, &Etag) -> Result<Vec<T>>,
    C: FnMut(&T) -> Result<Etag>,
    H: FnMut(Vec<T>) -> Result<()>,
{
    let mut cursor = Etag::zero();
    let mut total = 0u64;
    loop {
        let page = fetch(page_size, &cursor)?;
        if page.is_empty() {
            return Ok(total);
        }
        total += page.len() as u64;
        if let Some(last) = page.last() {
            cursor = cursor_of(last)?;
        }
        on_page(page)?;
    }
}
