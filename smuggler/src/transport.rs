//! Thin HTTP boundary against the document store.
//!
//! Both pipelines call through [`DocumentStore`] and never own the transport;
//! tests substitute an in-memory store behind the same trait.

use anyhow::{bail, Context, Result};
use serde_json::Value;

use crate::pager::Etag;

/// The seven store operations the pipelines need.
pub trait DocumentStore {
    /// One page of index definitions, offset-based.
    fn indexes_page(&self, page_size: usize, start: usize) -> Result<Vec<Value>>;
    /// One page of documents with etags strictly above the cursor.
    fn docs_page(&self, page_size: usize, etag: &Etag) -> Result<Vec<Value>>;
    /// One page of attachment listings (metadata only), same cursor rule.
    fn attachments_page(&self, page_size: usize, etag: &Etag) -> Result<Vec<Value>>;
    /// Binary payload of one attachment.
    fn attachment_data(&self, key: &str) -> Result<Vec<u8>>;
    /// Create or overwrite an index definition.
    fn put_index(&self, name: &str, definition: &Value) -> Result<()>;
    /// Apply one batch of document writes in a single request.
    fn bulk_docs(&self, commands: &[Value]) -> Result<()>;
    /// Store one attachment under `key` with metadata-derived headers.
    fn put_attachment(&self, key: &str, headers: &[(String, String)], data: &[u8]) -> Result<()>;
}

/// Blocking HTTP client over the store's REST endpoints.
///
/// One agent per pipeline run; connections are reused across calls. No
/// retries and no client-side timeouts: transport failures propagate to the
/// top-level boundary unchanged.
pub struct HttpStore {
    agent: ureq::Agent,
    base: String,
}

impl HttpStore {
    /// `base` must end with a slash; see `config::normalize_url`.
    pub fn new(base: impl Into<String>) -> Self {
        let config = ureq::Agent::config_builder().build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            base: base.into(),
        }
    }

    fn indexes_url(&self, page_size: usize, start: usize) -> String {
        format!("{}indexes?pageSize={page_size}&start={start}", self.base)
    }

    fn docs_url(&self, page_size: usize, etag: &Etag) -> String {
        format!("{}docs?pageSize={page_size}&etag={etag}", self.base)
    }

    fn attachments_url(&self, page_size: usize, etag: &Etag) -> String {
        format!("{}static/?pageSize={page_size}&etag={etag}", self.base)
    }

    fn get_json_page(&self, url: &str) -> Result<Vec<Value>> {
        let mut response = self
            .agent
            .get(url)
            .call()
            .with_context(|| format!("GET {url}"))?;
        let body = response
            .body_mut()
            .read_to_string()
            .with_context(|| format!("read response of GET {url}"))?;
        let parsed: Value =
            serde_json::from_str(&body).with_context(|| format!("parse response of GET {url}"))?;
        match parsed {
            Value::Array(items) => Ok(items),
            _ => bail!("GET {url}: expected a JSON array"),
        }
    }
}

impl DocumentStore for HttpStore {
    fn indexes_page(&self, page_size: usize, start: usize) -> Result<Vec<Value>> {
        self.get_json_page(&self.indexes_url(page_size, start))
    }

    fn docs_page(&self, page_size: usize, etag: &Etag) -> Result<Vec<Value>> {
        self.get_json_page(&self.docs_url(page_size, etag))
    }

    fn attachments_page(&self, page_size: usize, etag: &Etag) -> Result<Vec<Value>> {
        self.get_json_page(&self.attachments_url(page_size, etag))
    }

    fn attachment_data(&self, key: &str) -> Result<Vec<u8>> {
        let url = format!("{}static/{key}", self.base);
        let mut response = self
            .agent
            .get(&url)
            .call()
            .with_context(|| format!("GET {url}"))?;
        let mut data = Vec::new();
        std::io::Read::read_to_end(&mut response.body_mut().as_reader(), &mut data)
            .with_context(|| format!("read response of GET {url}"))?;
        Ok(data)
    }

    fn put_index(&self, name: &str, definition: &Value) -> Result<()> {
        let url = format!("{}indexes/{name}", self.base);
        let body = serde_json::to_vec(definition)?;
        self.agent
            .put(&url)
            .header("Content-Type", "application/json; charset=utf-8")
            .send(&body[..])
            .with_context(|| format!("PUT {url}"))?;
        Ok(())
    }

    fn bulk_docs(&self, commands: &[Value]) -> Result<()> {
        let url = format!("{}bulk_docs", self.base);
        let body = serde_json::to_vec(commands)?;
        self.agent
            .post(&url)
            .header("Content-Type", "application/json; charset=utf-8")
            .send(&body[..])
            .with_context(|| format!("POST {url}"))?;
        Ok(())
    }

    fn put_attachment(&self, key: &str, headers: &[(String, String)], data: &[u8]) -> Result<()> {
        let url = format!("{}static/{key}", self.base);
        let mut request = self.agent.put(&url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request.send(data).with_context(|| format!("PUT {url}"))?;
        Ok(())
    }
}
