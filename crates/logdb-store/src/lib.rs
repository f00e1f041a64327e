//! logdb-store: the document store boundary.
//!
//! The ingestion core only ever talks to the store through [`DocumentStore`].
//! [`MeiliClient`] implements it against a Meilisearch-compatible HTTP API;
//! tests substitute in-memory fakes.

pub mod meili;

use std::time::Duration;

use async_trait::async_trait;
use logdb_core::{DestinationHandle, Record};
use thiserror::Error;

pub use meili::MeiliClient;

/// Failures reported by a [`DocumentStore`].
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store answered definitively that the index does not exist.
    #[error("index `{uid}` not found")]
    IndexNotFound { uid: String },

    #[error("store responded {status}: {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("store request failed: {0}")]
    Transport(String),

    #[error("store request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid store response: {0}")]
    InvalidResponse(String),

    #[error("invalid index uid {0:?}")]
    InvalidUid(String),

    #[error("invalid store URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl StoreError {
    /// `true` only for a definitive "index not found". Every other failure,
    /// including ambiguous ones, is `false`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::IndexNotFound { .. })
    }
}

/// Operations the ingestion core needs from the document-search store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Every index the store currently holds.
    async fn list_indexes(&self) -> Result<Vec<DestinationHandle>, StoreError>;

    /// Look up one index. Absence is [`StoreError::IndexNotFound`].
    async fn get_index(&self, uid: &str) -> Result<DestinationHandle, StoreError>;

    /// Create an index with `primary_key` as its document identifier.
    async fn create_index(
        &self,
        uid: &str,
        primary_key: &str,
    ) -> Result<DestinationHandle, StoreError>;

    /// Insert `documents`, replacing any with the same primary key.
    async fn add_or_replace_documents(
        &self,
        uid: &str,
        documents: &[Record],
    ) -> Result<(), StoreError>;

    /// Succeeds when the store is reachable and serving.
    async fn health(&self) -> Result<(), StoreError>;
}
