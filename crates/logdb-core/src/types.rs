//! Core types for logdb-core.
//!
//! This module defines the data structures shared across all layers: the
//! canonical [`Record`] and its [`Batch`], the [`DestinationHandle`] that
//! addresses one index in the document store, and the sentinel
//! [`SchemaDocument`] that records every field name seen by a destination.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field injected into every record with a freshly generated UUID.
pub const ID_FIELD: &str = "@id";

/// Field injected into every record with the ingestion timestamp.
pub const TIMESTAMP_FIELD: &str = "@timestamp";

/// Identifier of the schema document inside each destination.
pub const SCHEMA_DOCUMENT_ID: &str = "key";

/// Field of the schema document listing every known key.
pub const SCHEMA_KEYS_FIELD: &str = "keys";

/// A canonical record: field name to JSON value.
pub type Record = serde_json::Map<String, Value>;

static NON_ALPHANUMERIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("[^a-zA-Z0-9]+").expect("tag sanitization pattern must be a valid regex")
});

/// Strip every non-alphanumeric ASCII character from a producer tag.
///
/// The result is used verbatim as the destination uid, so it must be stable:
/// `sanitize_tag(sanitize_tag(t)) == sanitize_tag(t)` for every `t`.
pub fn sanitize_tag(raw: &str) -> String {
    NON_ALPHANUMERIC.replace_all(raw, "").into_owned()
}

/// Format a timestamp the way every injected `@timestamp` is written.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ---------------------------------------------------------------------------
// DestinationHandle
// ---------------------------------------------------------------------------

/// One index in the document store, keyed by a sanitized tag.
///
/// Field names follow the store's wire format (`primaryKey`, `createdAt`, …)
/// so the handle deserializes straight from an index listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationHandle {
    pub uid: String,
    /// Display name. Stores that do not report one get the uid.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub primary_key: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl DestinationHandle {
    /// A handle for a destination created right now with [`ID_FIELD`] as its
    /// primary key.
    pub fn new(uid: impl Into<String>) -> Self {
        let uid = uid.into();
        let now = Utc::now();
        Self {
            name: uid.clone(),
            uid,
            primary_key: Some(ID_FIELD.to_string()),
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    /// Fill in the display name when the store left it blank.
    pub fn with_default_name(mut self) -> Self {
        if self.name.is_empty() {
            self.name = self.uid.clone();
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// The canonical output of one normalizer call.
///
/// A batch is all-or-nothing: it is only constructed once every input record
/// decoded successfully.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    records: Vec<Record>,
}

impl Batch {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Every distinct field name across every record in the batch.
    pub fn field_names(&self) -> BTreeSet<&str> {
        self.records
            .iter()
            .flat_map(|record| record.keys().map(String::as_str))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// SchemaDocument
// ---------------------------------------------------------------------------

/// Sentinel document listing every field name a destination has seen.
///
/// Written through the same add-or-replace call as ordinary records; its
/// fixed [`SCHEMA_DOCUMENT_ID`] means each push replaces the previous one.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDocument {
    pub keys: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl SchemaDocument {
    /// Build a schema document stamped now. Keys are sorted so consecutive
    /// pushes of the same set are byte-identical.
    pub fn new(keys: impl IntoIterator<Item = String>) -> Self {
        let mut keys: Vec<String> = keys.into_iter().collect();
        keys.sort_unstable();
        keys.dedup();
        Self {
            keys,
            timestamp: Utc::now(),
        }
    }

    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert(
            ID_FIELD.to_string(),
            Value::String(SCHEMA_DOCUMENT_ID.to_string()),
        );
        record.insert(
            SCHEMA_KEYS_FIELD.to_string(),
            Value::Array(self.keys.iter().cloned().map(Value::String).collect()),
        );
        record.insert(
            TIMESTAMP_FIELD.to_string(),
            Value::String(format_timestamp(self.timestamp)),
        );
        record
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
