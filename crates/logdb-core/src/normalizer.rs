//! Normalizer: turns raw payload bytes into a canonical [`Batch`].
//!
//! Two wire encodings are supported:
//!
//! - [`Encoding::Json`]: a single JSON object or an array of objects. A single
//!   object is promoted to a one-element batch.
//! - [`Encoding::MsgPack`]: a concatenation of msgpack `[timestamp, record]`
//!   pairs as emitted by log-shipping agents. The timestamp may be the
//!   EventTime extension, an integer of Unix seconds, or a
//!   `[timestamp, metadata]` pair wrapping either.
//!
//! Every record gets a fresh [`ID_FIELD`] and a [`TIMESTAMP_FIELD`], replacing
//! any fields of the same name. A batch is all-or-nothing: one malformed
//! record fails the whole call and nothing is handed onward.
//!
//! The normalizer holds no state, so concurrent callers never share buffers.

use std::io::Cursor;

use chrono::{DateTime, Utc};
use rmpv::Value as PackValue;
use serde_json::{Number, Value};
use thiserror::Error;

use crate::types::{format_timestamp, Batch, Record, ID_FIELD, TIMESTAMP_FIELD};

/// msgpack extension type carrying a (seconds, nanoseconds) event time.
const EVENT_TIME_EXT: i8 = 0;

/// Declared encoding of an ingestion payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Json,
    MsgPack,
}

impl Encoding {
    /// Pick the encoding from an HTTP `Content-Type`. Anything that is not a
    /// msgpack media type is treated as JSON.
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let media = content_type
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase());
        match media.as_deref() {
            Some("application/msgpack") | Some("application/x-msgpack") => Encoding::MsgPack,
            _ => Encoding::Json,
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Encoding::Json => write!(f, "json"),
            Encoding::MsgPack => write!(f, "msgpack"),
        }
    }
}

/// Why a payload could not be normalized.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("malformed JSON payload: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("expected a JSON object {location}, found {found}")]
    NotAnObject {
        location: String,
        found: &'static str,
    },

    #[error("malformed binary record stream: {0}")]
    Decode(#[from] rmpv::decode::Error),

    #[error("malformed binary entry #{index}: {reason}")]
    MalformedEntry { index: usize, reason: String },
}

impl NormalizeError {
    /// `true` for failures of the binary encoding, `false` for JSON ones.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::MalformedEntry { .. })
    }
}

/// Normalize `data` according to `encoding`.
pub fn normalize(data: &[u8], encoding: Encoding) -> Result<Batch, NormalizeError> {
    match encoding {
        Encoding::Json => normalize_json(data),
        Encoding::MsgPack => normalize_msgpack(data),
    }
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

/// Parse a JSON object or array of objects. Every record is stamped with the
/// wall-clock time of this call.
pub fn normalize_json(data: &[u8]) -> Result<Batch, NormalizeError> {
    let now = Utc::now();
    let records = match serde_json::from_slice::<Value>(data)? {
        Value::Object(record) => vec![record],
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| match item {
                Value::Object(record) => Ok(record),
                other => Err(NormalizeError::NotAnObject {
                    location: format!("at array index {index}"),
                    found: json_kind(&other),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?,
        other => {
            return Err(NormalizeError::NotAnObject {
                location: "or array at the top level".to_string(),
                found: json_kind(&other),
            })
        }
    };

    Ok(Batch::new(
        records
            .into_iter()
            .map(|record| enrich(record, now))
            .collect(),
    ))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// msgpack
// ---------------------------------------------------------------------------

/// Decode a concatenation of `[timestamp, record]` pairs.
///
/// Decoding stops cleanly at the end of the buffer; a value truncated midway
/// is a [`NormalizeError::Decode`].
pub fn normalize_msgpack(data: &[u8]) -> Result<Batch, NormalizeError> {
    let mut cursor = Cursor::new(data);
    let mut records = Vec::new();

    while (cursor.position() as usize) < data.len() {
        let index = records.len();
        let entry = rmpv::decode::read_value(&mut cursor)?;
        let (ts, fields) = split_entry(entry).map_err(|reason| NormalizeError::MalformedEntry {
            index,
            reason: reason.to_string(),
        })?;

        let ts = event_timestamp(&ts).unwrap_or_else(|| {
            tracing::debug!(entry = index, "invalid event time, defaulting to now");
            Utc::now()
        });

        let mut record = Record::new();
        for (key, value) in fields {
            let key = text_key(key).ok_or_else(|| NormalizeError::MalformedEntry {
                index,
                reason: "record keys must be strings".to_string(),
            })?;
            record.insert(key, to_json(value));
        }
        records.push(enrich(record, ts));
    }

    Ok(Batch::new(records))
}

fn split_entry(entry: PackValue) -> Result<(PackValue, Vec<(PackValue, PackValue)>), &'static str> {
    let PackValue::Array(items) = entry else {
        return Err("expected a [timestamp, record] array");
    };
    let [ts, record]: [PackValue; 2] = items
        .try_into()
        .map_err(|_| "expected exactly two elements")?;
    match record {
        PackValue::Map(fields) => Ok((ts, fields)),
        _ => Err("record element must be a map"),
    }
}

/// Interpret the timestamp element of an entry. `None` means the caller
/// should fall back to the current time.
fn event_timestamp(value: &PackValue) -> Option<DateTime<Utc>> {
    match value {
        PackValue::Ext(EVENT_TIME_EXT, data) => event_time(data),
        PackValue::Integer(secs) => secs
            .as_u64()
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        // Forward-protocol entries wrap the time as [time, metadata].
        PackValue::Array(items) => match items.as_slice() {
            [ts @ (PackValue::Ext(..) | PackValue::Integer(_)), PackValue::Map(_)] => {
                event_timestamp(ts)
            }
            _ => None,
        },
        _ => None,
    }
}

fn event_time(data: &[u8]) -> Option<DateTime<Utc>> {
    let [s0, s1, s2, s3, n0, n1, n2, n3]: [u8; 8] = data.try_into().ok()?;
    DateTime::from_timestamp(
        i64::from(u32::from_be_bytes([s0, s1, s2, s3])),
        u32::from_be_bytes([n0, n1, n2, n3]),
    )
}

fn text_key(key: PackValue) -> Option<String> {
    match key {
        PackValue::String(s) => Some(pack_text(&s)),
        PackValue::Binary(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        _ => None,
    }
}

fn pack_text(s: &rmpv::Utf8String) -> String {
    match s.as_str() {
        Some(s) => s.to_owned(),
        None => String::from_utf8_lossy(s.as_bytes()).into_owned(),
    }
}

/// Convert a msgpack value to JSON. Byte strings become text.
fn to_json(value: PackValue) -> Value {
    match value {
        PackValue::Nil => Value::Null,
        PackValue::Boolean(b) => Value::Bool(b),
        PackValue::Integer(n) => n
            .as_i64()
            .map(Value::from)
            .or_else(|| n.as_u64().map(Value::from))
            .unwrap_or(Value::Null),
        PackValue::F32(f) => float(f64::from(f)),
        PackValue::F64(f) => float(f),
        PackValue::String(s) => Value::String(pack_text(&s)),
        PackValue::Binary(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        PackValue::Array(items) => Value::Array(items.into_iter().map(to_json).collect()),
        PackValue::Map(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(key, value)| {
                    let key = match key {
                        key @ (PackValue::String(_) | PackValue::Binary(_)) => {
                            text_key(key).unwrap_or_default()
                        }
                        other => other.to_string(),
                    };
                    (key, to_json(value))
                })
                .collect(),
        ),
        PackValue::Ext(EVENT_TIME_EXT, data) => event_time(&data)
            .map(|ts| Value::String(format_timestamp(ts)))
            .unwrap_or(Value::Null),
        PackValue::Ext(kind, data) => serde_json::json!({ "ext": kind, "data": data }),
    }
}

fn float(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

fn enrich(mut record: Record, ts: DateTime<Utc>) -> Record {
    record.insert(
        ID_FIELD.to_string(),
        Value::String(uuid::Uuid::new_v4().to_string()),
    );
    record.insert(
        TIMESTAMP_FIELD.to_string(),
        Value::String(format_timestamp(ts)),
    );
    record
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
