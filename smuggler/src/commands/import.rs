//! Archive replay against a target instance.
//!
//! A token state machine walks the container grammar in strict section
//! order; any deviation fails with an error naming the expected construct.
//! Writes already applied when a later step fails are not rolled back.

use std::path::Path;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Value};
use tracing::info;

use dump_format::record::{
    ATTACHMENTS_SECTION, DOCS_SECTION, ID_KEY, INDEXES_SECTION, METADATA_KEY,
};
use dump_format::{AttachmentRecord, DumpReader};

use crate::config::TransferConfig;
use crate::transport::DocumentStore;

#[derive(Debug, Default, Clone, Copy)]
pub struct ImportReport {
    pub indexes_written: u64,
    pub documents: u64,
    pub attachments: u64,
}

/// Sections of the container, in the order the grammar admits them.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Start,
    Indexes,
    Docs,
    Attachments,
    Done,
}

/// Replay an archive into the target instance.
pub fn run(
    archive_path: &Path,
    store: &dyn DocumentStore,
    config: &TransferConfig,
    skip_indexes: bool,
) -> Result<ImportReport> {
    let started = Instant::now();
    let mut reader = DumpReader::open(archive_path)
        .with_context(|| format!("open {}", archive_path.display()))?;
    let mut report = ImportReport::default();

    let mut phase = Phase::Start;
    while phase != Phase::Done {
        phase = match phase {
            Phase::Start => {
                reader.expect_object_start()?;
                Phase::Indexes
            }
            Phase::Indexes => {
                report.indexes_written = replay_indexes(&mut reader, store, config, skip_indexes)?;
                Phase::Docs
            }
            Phase::Docs => {
                report.documents = replay_documents(&mut reader, store, config)?;
                Phase::Attachments
            }
            Phase::Attachments => {
                report.attachments = replay_attachments(&mut reader, store)?;
                Phase::Done
            }
            Phase::Done => unreachable!("loop exits at Done"),
        };
    }

    info!(
        indexes_written = report.indexes_written,
        documents = report.documents,
        attachments = report.attachments,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "import done"
    );
    Ok(report)
}

/// Reserved-namespace entries are consumed but never written; `skip` mutes
/// all index writes while keeping the token stream synchronized.
fn replay_indexes(
    reader: &mut DumpReader,
    store: &dyn DocumentStore,
    config: &TransferConfig,
    skip: bool,
) -> Result<u64> {
    reader.expect_property(INDEXES_SECTION)?;
    reader.expect_array_start()?;
    let mut written = 0u64;
    while let Some(index) = reader.next_array_element()? {
        if skip {
            continue;
        }
        let name = index
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("index entry is missing a string \"name\""))?;
        if config.is_reserved_index(name) {
            info!(name, "skipping reserved index");
            continue;
        }
        let definition = index
            .get("definition")
            .ok_or_else(|| anyhow!("index entry \"{name}\" is missing \"definition\""))?;
        store
            .put_index(name, definition)
            .with_context(|| format!("put index {name}"))?;
        written += 1;
    }
    Ok(written)
}

fn replay_documents(
    reader: &mut DumpReader,
    store: &dyn DocumentStore,
    config: &TransferConfig,
) -> Result<u64> {
    reader.expect_property(DOCS_SECTION)?;
    reader.expect_array_start()?;
    let mut batch = Vec::with_capacity(config.batch_size);
    let mut total = 0u64;
    while let Some(document) = reader.next_array_element()? {
        total += 1;
        batch.push(document);
        if batch.len() >= config.batch_size {
            flush_batch(store, &mut batch)?;
        }
    }
    // the remainder flushes even when empty
    flush_batch(store, &mut batch)?;
    Ok(total)
}

/// Turn the batch into one bulk request: metadata detached from each body,
/// write key taken from `@metadata.@id`. The batch is cleared regardless of
/// response content; a failed request aborts the whole import.
fn flush_batch(store: &dyn DocumentStore, batch: &mut Vec<Value>) -> Result<()> {
    let started = Instant::now();
    let mut commands = Vec::with_capacity(batch.len());
    for mut document in batch.drain(..) {
        let metadata = document
            .as_object_mut()
            .and_then(|body| body.remove(METADATA_KEY))
            .ok_or_else(|| anyhow!("document record is missing {METADATA_KEY}"))?;
        let key = metadata
            .get(ID_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("document metadata is missing {ID_KEY}"))?
            .to_string();
        commands.push(json!({
            "Method": "PUT",
            "Document": document,
            "Metadata": metadata,
            "Key": key,
        }));
    }
    let count = commands.len();
    store.bulk_docs(&commands).context("bulk document write")?;
    info!(
        documents = count,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "wrote batch"
    );
    Ok(())
}

/// One request per attachment; metadata values are de-quoted into headers.
/// The section is optional at the tail for dumps written without it.
fn replay_attachments(reader: &mut DumpReader, store: &dyn DocumentStore) -> Result<u64> {
    if !reader.optional_property(ATTACHMENTS_SECTION)? {
        return Ok(0);
    }
    reader.expect_array_start()?;
    let mut total = 0u64;
    while let Some(entry) = reader.next_array_element()? {
        let record: AttachmentRecord =
            serde_json::from_value(entry).context("decode attachment record")?;
        if record.key.is_empty() {
            bail!("attachment record has an empty key");
        }
        info!(key = record.key.as_str(), "importing attachment");
        let headers: Vec<(String, String)> = record
            .metadata
            .iter()
            .map(|(name, value)| (name.clone(), header_value(value)))
            .collect();
        store
            .put_attachment(&record.key, &headers, &record.data)
            .with_context(|| format!("put attachment {}", record.key))?;
        total += 1;
    }
    Ok(total)
}

/// Metadata values may arrive JSON-quoted; strings lose their quotes, other
/// scalars keep their compact rendering.
fn header_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeStore;
    use dump_format::{DumpWriter, TokenWriter};
    use serde_json::json;
    use std::path::PathBuf;

    fn etag(n: usize) -> String {
        format!("00000000-0000-0000-0000-{n:012}")
    }

    fn doc(n: usize) -> Value {
        json!({
            "Name": format!("customer {n}"),
            "@metadata": {"@id": format!("customers/{n}"), "@etag": etag(n)}
        })
    }

    fn write_archive(
        dir: &Path,
        indexes: &[Value],
        docs: &[Value],
        attachments: Option<&[Value]>,
    ) -> PathBuf {
        let path = dir.join("dump");
        let mut writer = DumpWriter::create(&path).unwrap();
        let tokens = writer.tokens();
        tokens.start_object().unwrap();
        tokens.property("Indexes").unwrap();
        tokens.start_array().unwrap();
        for index in indexes {
            tokens.value(index).unwrap();
        }
        tokens.end_array().unwrap();
        tokens.property("Docs").unwrap();
        tokens.start_array().unwrap();
        for document in docs {
            tokens.value(document).unwrap();
        }
        tokens.end_array().unwrap();
        if let Some(attachments) = attachments {
            tokens.property("Attachments").unwrap();
            tokens.start_array().unwrap();
            for attachment in attachments {
                tokens.value(attachment).unwrap();
            }
            tokens.end_array().unwrap();
        }
        tokens.end_object().unwrap();
        writer.finish().unwrap();
        path
    }

    #[test]
    fn batches_flush_at_128_with_unconditional_remainder() {
        let dir = tempfile::tempdir().unwrap();
        let docs: Vec<Value> = (1..=300).map(doc).collect();
        let path = write_archive(dir.path(), &[], &docs, None);

        let store = FakeStore::default();
        let report = run(&path, &store, &TransferConfig::default(), false).unwrap();
        assert_eq!(report.documents, 300);

        let batches = store.bulk_batches.borrow();
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![128, 128, 44]);

        let first = &batches[0][0];
        assert_eq!(first["Method"], "PUT");
        assert_eq!(first["Key"], "customers/1");
        assert_eq!(first["Metadata"]["@id"], "customers/1");
        // metadata is detached from the body before the write
        assert!(first["Document"].get("@metadata").is_none());
        assert_eq!(first["Document"]["Name"], "customer 1");
    }

    #[test]
    fn empty_docs_array_still_flushes_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_archive(dir.path(), &[], &[], None);

        let store = FakeStore::default();
        let report = run(&path, &store, &TransferConfig::default(), false).unwrap();
        assert_eq!(report.documents, 0);
        let sizes: Vec<usize> = store.bulk_batches.borrow().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![0]);
    }

    #[test]
    fn reserved_indexes_are_never_written() {
        let dir = tempfile::tempdir().unwrap();
        let indexes = vec![
            json!({"name": "Raven/DocumentsByEntityName", "definition": {"map": "server"}}),
            json!({"name": "Temp/Scratch", "definition": {"map": "scratch"}}),
            json!({"name": "Orders/ByCustomer", "definition": {"map": "orders"}}),
        ];
        let path = write_archive(dir.path(), &indexes, &[], None);

        let store = FakeStore::default();
        let report = run(&path, &store, &TransferConfig::default(), false).unwrap();
        assert_eq!(report.indexes_written, 1);

        let written = store.put_indexes.borrow();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].0, "Orders/ByCustomer");
        assert_eq!(written[0].1, json!({"map": "orders"}));
    }

    #[test]
    fn skip_indexes_consumes_the_section_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let indexes = vec![json!({"name": "Orders/ByCustomer", "definition": {"map": "m"}})];
        let docs = vec![doc(1)];
        let path = write_archive(dir.path(), &indexes, &docs, None);

        let store = FakeStore::default();
        let report = run(&path, &store, &TransferConfig::default(), true).unwrap();
        assert_eq!(report.indexes_written, 0);
        assert!(store.put_indexes.borrow().is_empty());
        // the stream stayed synchronized: documents still imported
        assert_eq!(report.documents, 1);
    }

    #[test]
    fn missing_docs_property_fails_naming_the_construct() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-docs");
        std::fs::write(&path, r#"{"Indexes":[]}"#).unwrap();

        let store = FakeStore::default();
        let err = run(&path, &store, &TransferConfig::default(), false).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("PropertyName"), "{message}");
        assert!(message.contains("Docs"), "{message}");
        assert!(store.bulk_batches.borrow().is_empty());
    }

    #[test]
    fn wrong_token_type_fails_naming_the_construct() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad-indexes");
        std::fs::write(&path, r#"{"Indexes":{}}"#).unwrap();

        let store = FakeStore::default();
        let err = run(&path, &store, &TransferConfig::default(), false).unwrap_err();
        assert!(format!("{err:#}").contains("StartArray"));
    }

    #[test]
    fn archive_without_attachments_section_imports_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_archive(dir.path(), &[], &[doc(1)], None);

        let store = FakeStore::default();
        let report = run(&path, &store, &TransferConfig::default(), false).unwrap();
        assert_eq!(report.documents, 1);
        assert_eq!(report.attachments, 0);
    }

    #[test]
    fn truncated_after_docs_array_imports_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy");
        std::fs::write(&path, r#"{"Indexes":[],"Docs":[]"#).unwrap();

        let store = FakeStore::default();
        let report = run(&path, &store, &TransferConfig::default(), false).unwrap();
        assert_eq!(report.attachments, 0);
    }

    #[test]
    fn attachment_metadata_is_dequoted_into_headers() {
        let dir = tempfile::tempdir().unwrap();
        // "true" is a JSON-quoted string in the archive; the header gets the
        // bare content, while non-string scalars keep their compact rendering
        let attachments = vec![json!({
            "Key": "files/flag",
            "Metadata": {"Skip-Verification": "true", "Content-Length": 4},
            "Data": "AQIDBA=="
        })];
        let path = write_archive(dir.path(), &[], &[], Some(&attachments));

        let store = FakeStore::default();
        let report = run(&path, &store, &TransferConfig::default(), false).unwrap();
        assert_eq!(report.attachments, 1);

        let puts = store.put_attachments.borrow();
        let (key, headers, data) = &puts[0];
        assert_eq!(key, "files/flag");
        assert_eq!(data, &[1, 2, 3, 4]);
        assert!(headers.contains(&("Skip-Verification".to_string(), "true".to_string())));
        assert!(headers.contains(&("Content-Length".to_string(), "4".to_string())));
    }

    #[test]
    fn plain_and_gzip_archives_import_identically() {
        let dir = tempfile::tempdir().unwrap();
        let docs = vec![doc(1), doc(2)];
        let gz_path = write_archive(dir.path(), &[], &docs, None);

        let plain_path = dir.path().join("plain");
        let mut tokens = TokenWriter::new(Vec::new());
        tokens.start_object().unwrap();
        tokens.property("Indexes").unwrap();
        tokens.start_array().unwrap();
        tokens.end_array().unwrap();
        tokens.property("Docs").unwrap();
        tokens.start_array().unwrap();
        for document in &docs {
            tokens.value(document).unwrap();
        }
        tokens.end_array().unwrap();
        tokens.end_object().unwrap();
        std::fs::write(&plain_path, tokens.into_inner()).unwrap();

        let gz_store = FakeStore::default();
        let plain_store = FakeStore::default();
        run(&gz_path, &gz_store, &TransferConfig::default(), false).unwrap();
        run(&plain_path, &plain_store, &TransferConfig::default(), false).unwrap();
        assert_eq!(
            *gz_store.bulk_batches.borrow(),
            *plain_store.bulk_batches.borrow()
        );
    }

    #[test]
    fn export_then_import_round_trips_the_instance() {
        use crate::commands::export;
        use crate::config::ExportSpec;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump");

        let mut source = FakeStore::default();
        source.indexes = vec![
            json!({"name": "Orders/ByCustomer", "definition": {"map": "orders"}}),
            json!({"name": "Raven/DocumentsByEntityName", "definition": {"map": "server"}}),
        ];
        source.docs = (1..=150).map(doc).collect();
        source.attachment_listings = vec![json!({
            "Key": "files/logo",
            "Etag": etag(9001),
            "Metadata": {"Content-Type": "image/png"}
        })];
        source
            .attachment_data
            .insert("files/logo".to_string(), vec![9, 8, 7]);

        let spec = ExportSpec::new("http://localhost:8080", &path, false, true).unwrap();
        export::run(&spec, &source, &TransferConfig::default()).unwrap();

        let target = FakeStore::default();
        let report = run(&path, &target, &TransferConfig::default(), false).unwrap();
        assert_eq!(report.documents, 150);
        assert_eq!(report.attachments, 1);

        // only the non-reserved index arrives
        let indexes = target.put_indexes.borrow();
        assert_eq!(indexes.len(), 1);
        assert_eq!(indexes[0].0, "Orders/ByCustomer");
        assert_eq!(indexes[0].1, json!({"map": "orders"}));

        // documents reassemble to the source shape, ignoring nothing: the
        // archive carried metadata (etag included) verbatim
        let batches = target.bulk_batches.borrow();
        let mut restored = Vec::new();
        for command in batches.iter().flatten() {
            let mut document = command["Document"].clone();
            document
                .as_object_mut()
                .unwrap()
                .insert("@metadata".to_string(), command["Metadata"].clone());
            restored.push(document);
        }
        assert_eq!(restored, source.docs);

        let attachments = target.put_attachments.borrow();
        let (key, headers, data) = &attachments[0];
        assert_eq!(key, "files/logo");
        assert_eq!(data, &[9, 8, 7]);
        assert_eq!(
            headers.as_slice(),
            [("Content-Type".to_string(), "image/png".to_string())]
        );
    }

    #[test]
    fn document_without_metadata_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_archive(dir.path(), &[], &[json!({"Name": "orphan"})], None);

        let store = FakeStore::default();
        let err = run(&path, &store, &TransferConfig::default(), false).unwrap_err();
        assert!(format!("{err:#}").contains("@metadata"));
    }
}
