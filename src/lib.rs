//! logdb is a log ingestion adapter for document-search stores.
//!
//! Producers push batches of structured log records, tagged with a routing
//! key, over HTTP or through the output-plugin interface. Each record is
//! normalized, stamped with an `@id` and `@timestamp`, and written to the
//! store index named after its sanitized tag. Indexes are created on first
//! use, and every index keeps a schema document listing the field names it
//! has seen.
//!
//! # Architecture
//!
//! ```text
//!   api ─────┐
//!            ├──► service ──► admission ──► normalizer ──► registry ──► store
//!   plugin ──┘        │                                       │           │
//!                     └────────────► monitor ◄────────────────┴───────────┘
//!                                      │
//!                                      └──► operating token (stops intake)
//! ```
//!
//! The normalizer and configuration live in `logdb-core`; the store client in
//! `logdb-store`. This crate owns the concurrency: admission control, the
//! shared registry, background writes and the error breaker.

pub mod admission;
pub mod api;
pub mod app;
pub mod logging;
pub mod monitor;
pub mod plugin;
pub mod registry;
pub mod service;

pub use admission::{AdmissionController, AdmissionToken, Busy};
pub use monitor::{ErrorMonitor, ErrorReporter, MonitorConfig};
pub use plugin::{FlushStatus, OutputPlugin, PluginDefinition};
pub use registry::IndexRegistry;
pub use service::{IngestService, SubmitError, WriteSummary};
