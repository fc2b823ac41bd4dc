//! File manifest replicator.
//!
//! An ordered list of shared-file records stored in the replicated document's
//! `files` array, one map-shaped record per element. Order is whatever the
//! replication layer converges to; nothing here reorders.
//!
//! Observers always receive the whole list, never a diff. Manifests hold
//! metadata only, so they stay small.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use yrs::types::array::ArrayEvent;
use yrs::{Any, Array, ArrayRef, Doc, Observable, Out, ReadTxn, Transact};

use crate::subscription::Subscription;

/// Name of the shared array holding the manifest.
pub const FILES_ARRAY: &str = "files";

/// Metadata of one uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileManifestEntry {
    pub name: String,
    /// Retrieval URL
    pub url: String,
    /// Size in bytes
    pub size: u64,
    /// Opaque storage key
    pub key: String,
    /// Upload completion time, epoch millis
    pub uploaded_at: u64,
}

impl FileManifestEntry {
    /// A record stamped with the current time.
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        size: u64,
        key: impl Into<String>,
    ) -> Self {
        let uploaded_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            name: name.into(),
            url: url.into(),
            size,
            key: key.into(),
            uploaded_at,
        }
    }

    /// Size for display, e.g. `1.5 KB`.
    pub fn display_size(&self) -> String {
        format_size(self.size)
    }

    /// The record as stored in the shared array: a plain map with the
    /// camelCase field names, numbers as doubles.
    fn to_any(&self) -> Any {
        let fields = HashMap::from([
            ("name".to_string(), Any::String(self.name.as_str().into())),
            ("url".to_string(), Any::String(self.url.as_str().into())),
            ("size".to_string(), Any::Number(self.size as f64)),
            ("key".to_string(), Any::String(self.key.as_str().into())),
            ("uploadedAt".to_string(), Any::Number(self.uploaded_at as f64)),
        ]);
        Any::Map(Arc::new(fields))
    }

    fn from_fields(fields: &HashMap<String, Any>) -> Result<Self, String> {
        Ok(Self {
            name: text_field(fields, "name")?,
            url: text_field(fields, "url")?,
            size: number_field(fields, "size")?,
            key: text_field(fields, "key")?,
            uploaded_at: number_field(fields, "uploadedAt")?,
        })
    }
}

fn text_field(fields: &HashMap<String, Any>, name: &str) -> Result<String, String> {
    match fields.get(name) {
        Some(Any::String(value)) => Ok(value.to_string()),
        Some(other) => Err(format!("field '{name}' is not a string: {other:?}")),
        None => Err(format!("missing field '{name}'")),
    }
}

fn number_field(fields: &HashMap<String, Any>, name: &str) -> Result<u64, String> {
    match fields.get(name) {
        Some(Any::Number(value)) if value.is_finite() && *value >= 0.0 => Ok(*value as u64),
        Some(Any::BigInt(value)) if *value >= 0 => Ok(*value as u64),
        Some(other) => Err(format!("field '{name}' is not a byte count: {other:?}")),
        None => Err(format!("missing field '{name}'")),
    }
}

/// Human-readable byte count, 1024-based, at most two decimals.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = (value * 100.0).round() / 100.0;
    let text = format!("{rounded:.2}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    format!("{text} {}", UNITS[unit])
}

/// Replicated, ordered list of [`FileManifestEntry`].
pub struct FileManifest {
    doc: Doc,
    files: ArrayRef,
}

impl FileManifest {
    /// Bind to the `files` array of `doc`, creating it if needed.
    pub fn new(doc: &Doc) -> Self {
        let files = doc.get_or_insert_array(FILES_ARRAY);
        Self {
            doc: doc.clone(),
            files,
        }
    }

    /// Append at the end of the replicated sequence.
    pub fn append(&self, entry: &FileManifestEntry) {
        let mut txn = self.doc.transact_mut();
        self.files.push_back(&mut txn, entry.to_any());
        log::debug!("Appended {} to manifest", entry.name);
    }

    /// Current ordered sequence.
    pub fn snapshot(&self) -> Vec<FileManifestEntry> {
        let txn = self.doc.transact();
        decode_entries(&self.files, &txn)
    }

    pub fn len(&self) -> usize {
        let txn = self.doc.transact();
        self.files.len(&txn) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver the full sequence now and after every change.
    pub fn observe(
        &self,
        callback: impl Fn(&[FileManifestEntry]) + Send + Sync + 'static,
    ) -> Subscription {
        callback(&self.snapshot());
        let subscription = self.files.observe(move |txn, event: &ArrayEvent| {
            let entries = decode_entries(event.target(), txn);
            callback(&entries);
        });
        Subscription::from_yrs(subscription)
    }
}

fn decode_entries<T: ReadTxn>(files: &ArrayRef, txn: &T) -> Vec<FileManifestEntry> {
    files
        .iter(txn)
        .filter_map(|value| match value {
            Out::Any(Any::Map(fields)) => match FileManifestEntry::from_fields(&fields) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    log::warn!("Skipping malformed manifest entry: {e}");
                    None
                }
            },
            // Older peers stored each record as a JSON string.
            Out::Any(Any::String(raw)) => match serde_json::from_str(&raw) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    log::warn!("Skipping malformed manifest entry: {e}");
                    None
                }
            },
            other => {
                log::warn!("Skipping non-record manifest element: {other:?}");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use yrs::updates::decoder::Decode;
    use yrs::{StateVector, Update};

    fn entry(name: &str) -> FileManifestEntry {
        FileManifestEntry {
            name: name.to_string(),
            url: format!("https://files.example.com/{name}"),
            size: 1024,
            key: format!("key-{name}"),
            uploaded_at: 1_700_000_000_000,
        }
    }

    fn names(entries: &[FileManifestEntry]) -> Vec<String> {
        entries.iter().map(|e| e.name.clone()).collect()
    }

    /// Replicate everything `from` has into `to`.
    fn replicate(from: &Doc, to: &Doc) {
        let update = from.transact().encode_state_as_update_v1(&StateVector::default());
        let mut txn = to.transact_mut();
        txn.apply_update(Update::decode_v1(&update).unwrap()).unwrap();
    }

    #[test]
    fn test_append_preserves_order() {
        let doc = Doc::new();
        let manifest = FileManifest::new(&doc);
        assert!(manifest.is_empty());

        manifest.append(&entry("a.txt"));
        manifest.append(&entry("b.txt"));

        assert_eq!(names(&manifest.snapshot()), vec!["a.txt", "b.txt"]);
        assert_eq!(manifest.len(), 2);
    }

    #[test]
    fn test_observe_delivers_current_then_changes() {
        let doc = Doc::new();
        let manifest = FileManifest::new(&doc);
        manifest.append(&entry("a.txt"));

        let seen: Arc<Mutex<Vec<Vec<String>>>> = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _sub = manifest.observe(move |entries| s.lock().unwrap().push(names(entries)));

        manifest.append(&entry("b.txt"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], vec!["a.txt"]);
        assert_eq!(seen[1], vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_disposed_observer_stops() {
        let doc = Doc::new();
        let manifest = FileManifest::new(&doc);
        let seen = Arc::new(Mutex::new(0usize));
        let s = seen.clone();
        let mut sub = manifest.observe(move |_| *s.lock().unwrap() += 1);

        sub.dispose();
        manifest.append(&entry("a.txt"));
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_replicated_to_late_subscriber() {
        let local = Doc::new();
        let remote = Doc::new();
        let ours = FileManifest::new(&local);
        let theirs = FileManifest::new(&remote);

        ours.append(&entry("a.txt"));
        ours.append(&entry("b.txt"));
        replicate(&local, &remote);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _sub = theirs.observe(move |entries| *s.lock().unwrap() = names(entries));

        assert_eq!(*seen.lock().unwrap(), vec!["a.txt", "b.txt"]);
        assert_eq!(ours.snapshot(), theirs.snapshot());
    }

    #[test]
    fn test_remote_append_notifies_subscriber() {
        let local = Doc::new();
        let remote = Doc::new();
        let ours = FileManifest::new(&local);
        let theirs = FileManifest::new(&remote);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _sub = theirs.observe(move |entries| *s.lock().unwrap() = names(entries));

        ours.append(&entry("a.txt"));
        replicate(&local, &remote);
        assert_eq!(*seen.lock().unwrap(), vec!["a.txt"]);
    }

    #[test]
    fn test_malformed_elements_are_skipped() {
        let doc = Doc::new();
        let manifest = FileManifest::new(&doc);
        {
            let files = doc.get_or_insert_array(FILES_ARRAY);
            let mut txn = doc.transact_mut();
            files.push_back(&mut txn, "{not json".to_string());
        }
        manifest.append(&entry("a.txt"));
        assert_eq!(names(&manifest.snapshot()), vec!["a.txt"]);
        assert_eq!(manifest.len(), 2);
    }

    #[test]
    fn test_records_are_stored_as_maps() {
        let doc = Doc::new();
        let manifest = FileManifest::new(&doc);
        manifest.append(&entry("a.txt"));

        let files = doc.get_or_insert_array(FILES_ARRAY);
        let txn = doc.transact();
        let Some(Out::Any(Any::Map(fields))) = files.get(&txn, 0) else {
            panic!("expected a map record");
        };
        assert_eq!(fields.get("name"), Some(&Any::String("a.txt".into())));
        assert_eq!(fields.get("size"), Some(&Any::Number(1024.0)));
        assert_eq!(
            fields.get("uploadedAt"),
            Some(&Any::Number(1_700_000_000_000.0))
        );
        assert!(fields.get("uploaded_at").is_none());
    }

    #[test]
    fn test_reads_map_records_from_other_writers() {
        let doc = Doc::new();
        let manifest = FileManifest::new(&doc);
        {
            let files = doc.get_or_insert_array(FILES_ARRAY);
            let record = HashMap::from([
                ("name".to_string(), Any::String("a.txt".into())),
                ("url".to_string(), Any::String("https://f/a.txt".into())),
                ("size".to_string(), Any::Number(1536.0)),
                ("key".to_string(), Any::String("ka".into())),
                ("uploadedAt".to_string(), Any::Number(1_700_000_000_000.0)),
            ]);
            let mut txn = doc.transact_mut();
            files.push_back(&mut txn, Any::Map(Arc::new(record)));
        }

        let entries = manifest.snapshot();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a.txt");
        assert_eq!(entries[0].key, "ka");
        assert_eq!(entries[0].display_size(), "1.5 KB");
        assert_eq!(entries[0].uploaded_at, 1_700_000_000_000);
    }

    #[test]
    fn test_reads_legacy_string_records() {
        let doc = Doc::new();
        let manifest = FileManifest::new(&doc);
        {
            let files = doc.get_or_insert_array(FILES_ARRAY);
            let raw = serde_json::to_string(&entry("old.txt")).unwrap();
            let mut txn = doc.transact_mut();
            files.push_back(&mut txn, raw);
        }
        manifest.append(&entry("new.txt"));
        assert_eq!(names(&manifest.snapshot()), vec!["old.txt", "new.txt"]);
    }

    #[test]
    fn test_incomplete_map_record_is_skipped() {
        let doc = Doc::new();
        let manifest = FileManifest::new(&doc);
        {
            let files = doc.get_or_insert_array(FILES_ARRAY);
            let record = HashMap::from([("name".to_string(), Any::String("x".into()))]);
            let mut txn = doc.transact_mut();
            files.push_back(&mut txn, Any::Map(Arc::new(record)));
        }
        manifest.append(&entry("a.txt"));
        assert_eq!(names(&manifest.snapshot()), vec!["a.txt"]);
    }

    #[test]
    fn test_entry_json_schema() {
        let json = serde_json::to_value(entry("a.txt")).unwrap();
        assert_eq!(json["name"], "a.txt");
        assert_eq!(json["size"], 1024);
        assert_eq!(json["uploadedAt"], 1_700_000_000_000u64);
        assert!(json.get("uploaded_at").is_none());
    }

    #[test]
    fn test_new_entry_is_timestamped() {
        let e = FileManifestEntry::new("notes.md", "https://x/notes.md", 10, "k");
        assert!(e.uploaded_at > 0);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 Bytes");
        assert_eq!(format_size(512), "512 Bytes");
        assert_eq!(format_size(1024), "1 KB");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5 MB");
        assert_eq!(format_size(1_234_567), "1.18 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024 * 1024), "3072 GB");
    }
}
