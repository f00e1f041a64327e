//! Index registry: resolves tags to destinations and tracks their schemas.
//!
//! ```text
//!   resolve(tag) ──▶ cache hit? ──yes──▶ handle
//!                        │ no
//!                        ▼
//!                  create lock ──▶ recheck ──▶ get_index ──not found──▶ create_index
//!                                                  │                         │
//!                                                  └──────── cache ◀─────────┘
//! ```
//!
//! The create lock is held across the store round-trips, so a destination is
//! created at most once per process however many batches race for it. The
//! cache is only written after the store has produced a handle; a failed
//! lookup leaves it untouched.
//!
//! Each destination also carries the set of every field name seen so far.
//! The set only grows. Whenever a batch adds to it, the full set is written
//! to the destination as the [`SchemaDocument`]. Writes for one destination
//! are serialized, and each one snapshots the set after taking the lock, so
//! the last schema document to land is always a superset of earlier ones.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use logdb_core::{sanitize_tag, Batch, DestinationHandle, SchemaDocument, ID_FIELD};
use logdb_store::{DocumentStore, StoreError};
use tracing::{debug, info, warn};

/// Field names known for one destination.
#[derive(Debug, Default)]
struct KeySet {
    keys: RwLock<HashSet<String>>,
    /// Set when the last schema write failed and must be retried.
    stale: AtomicBool,
    push: tokio::sync::Mutex<()>,
}

impl KeySet {
    /// Add every unseen name; `true` if the set grew.
    fn discover<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> bool {
        let unseen: Vec<&str> = {
            let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
            names.into_iter().filter(|name| !keys.contains(*name)).collect()
        };
        if unseen.is_empty() {
            return false;
        }
        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        let mut grew = false;
        for name in unseen {
            grew |= keys.insert(name.to_string());
        }
        grew
    }

    fn snapshot(&self) -> Vec<String> {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        keys.iter().cloned().collect()
    }
}

/// Shared map from sanitized tag to destination, plus per-destination schemas.
pub struct IndexRegistry {
    store: Arc<dyn DocumentStore>,
    indexes: RwLock<HashMap<String, DestinationHandle>>,
    schemas: RwLock<HashMap<String, Arc<KeySet>>>,
    create: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for IndexRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexRegistry")
            .field("destinations", &self.len())
            .finish_non_exhaustive()
    }
}

impl IndexRegistry {
    /// An empty registry.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            indexes: RwLock::new(HashMap::new()),
            schemas: RwLock::new(HashMap::new()),
            create: tokio::sync::Mutex::new(()),
        }
    }

    /// A registry pre-populated with every index the store already holds.
    pub async fn bootstrap(store: Arc<dyn DocumentStore>) -> Result<Self, StoreError> {
        let existing = store.list_indexes().await?;
        let registry = Self::new(store);
        {
            let mut indexes = registry.indexes.write().unwrap_or_else(PoisonError::into_inner);
            for handle in existing {
                indexes.insert(handle.uid.clone(), handle);
            }
        }
        info!(destinations = registry.len(), "index cache warmed");
        Ok(registry)
    }

    /// Number of cached destinations.
    pub fn len(&self) -> usize {
        self.indexes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// `true` when no destination is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The cached handle for `uid`, without touching the store.
    pub fn cached(&self, uid: &str) -> Option<DestinationHandle> {
        self.indexes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uid)
            .cloned()
    }

    /// Return the destination for `tag`, creating it in the store if it does
    /// not exist yet.
    ///
    /// Only a definitive "not found" from the store leads to creation. Any
    /// other lookup failure is returned as-is.
    pub async fn resolve(&self, tag: &str) -> Result<DestinationHandle, StoreError> {
        let uid = sanitize_tag(tag);
        if uid.is_empty() {
            return Err(StoreError::InvalidUid(tag.to_string()));
        }
        if let Some(handle) = self.cached(&uid) {
            return Ok(handle);
        }

        let _guard = self.create.lock().await;
        if let Some(handle) = self.cached(&uid) {
            return Ok(handle);
        }

        let handle = match self.store.get_index(&uid).await {
            Ok(handle) => handle,
            Err(err) if err.is_not_found() => {
                let handle = self.store.create_index(&uid, ID_FIELD).await?;
                info!(uid = %handle.uid, "destination created");
                handle
            }
            Err(err) => return Err(err),
        };

        self.indexes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uid, handle.clone());
        Ok(handle)
    }

    fn key_set(&self, uid: &str) -> Arc<KeySet> {
        if let Some(set) = self
            .schemas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uid)
        {
            return set.clone();
        }
        self.schemas
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(uid.to_string())
            .or_default()
            .clone()
    }

    /// Record `names` as seen by `uid`. Returns `true` if any was new.
    pub fn discover<'a>(&self, uid: &str, names: impl IntoIterator<Item = &'a str>) -> bool {
        self.key_set(uid).discover(names)
    }

    /// Every field name seen by `uid`, sorted.
    pub fn known_keys(&self, uid: &str) -> Vec<String> {
        let Some(set) = self
            .schemas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uid)
            .cloned()
        else {
            return Vec::new();
        };
        let mut keys = set.snapshot();
        keys.sort_unstable();
        keys
    }

    /// Fold the batch's field names into `uid`'s key set and, if it grew or a
    /// previous write failed, write the schema document.
    ///
    /// Returns whether a schema document was written. On failure the
    /// destination is flagged so the next batch retries the write even if it
    /// brings no new names.
    pub async fn publish_schema(&self, uid: &str, batch: &Batch) -> Result<bool, StoreError> {
        let set = self.key_set(uid);
        let grew = set.discover(batch.field_names());
        let retry = set.stale.swap(false, Ordering::AcqRel);
        if !grew && !retry {
            return Ok(false);
        }

        let _push = set.push.lock().await;
        let schema = SchemaDocument::new(set.snapshot());
        match self
            .store
            .add_or_replace_documents(uid, &[schema.to_record()])
            .await
        {
            Ok(()) => {
                debug!(uid, keys = schema.keys.len(), "schema document written");
                Ok(true)
            }
            Err(err) => {
                set.stale.store(true, Ordering::Release);
                warn!(uid, error = %err, "schema document write failed");
                Err(err)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
