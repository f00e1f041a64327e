//! logdb-core: shared types and pure logic for the logdb ingestion adapter.
//!
//! Nothing in this crate performs I/O against the document store. It owns the
//! data model that flows between the layers, the record normalizer, and the
//! configuration surface.
//!
//! # Architecture
//!
//! ```text
//! HTTP / plugin ──► Admission ──► Normalizer ──► Registry ──► Store
//!                      │                            │           │
//!                      └────────────► Error monitor ◄───────────┘
//! ```
//!
//! The normalizer lives here; admission, registry and the error monitor live
//! in the root `logdb` crate, the store client in `logdb-store`.

pub mod config;
pub mod normalizer;
pub mod types;

pub use normalizer::{normalize, Encoding, NormalizeError};
pub use types::{
    sanitize_tag, Batch, DestinationHandle, Record, SchemaDocument, ID_FIELD, SCHEMA_DOCUMENT_ID,
    SCHEMA_KEYS_FIELD, TIMESTAMP_FIELD,
};
