//! In-memory [`DocumentStore`] with knobs for failure injection.
//!
//! Documents are kept per index, keyed by their `@id`, so add-or-replace
//! semantics match the real store. Writes can be held behind a gate to
//! observe how many are in flight at once.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use logdb_core::{DestinationHandle, Record, ID_FIELD, SCHEMA_DOCUMENT_ID};
use logdb_store::{DocumentStore, StoreError};
use serde_json::Value;
use tokio::sync::watch;

#[derive(Default)]
struct Inner {
    indexes: BTreeMap<String, DestinationHandle>,
    documents: HashMap<String, BTreeMap<String, Record>>,
    schema_writes: HashMap<String, usize>,
    get_failure: Option<StoreError>,
    list_failure: Option<StoreError>,
    fail_creates: bool,
    failing_adds: usize,
    failing_schema_writes: usize,
    fail_all_adds: bool,
    create_delay: Duration,
    health_delay: Duration,
}

pub struct MockStore {
    inner: Mutex<Inner>,
    healthy: AtomicBool,
    gate: watch::Sender<bool>,
    get_calls: AtomicUsize,
    create_calls: AtomicUsize,
    add_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockStore {
    pub fn new() -> Arc<Self> {
        let (gate, _) = watch::channel(true);
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            healthy: AtomicBool::new(true),
            gate,
            get_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            add_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    /// A store that already holds the given indexes.
    pub fn with_indexes(uids: &[&str]) -> Arc<Self> {
        let store = Self::new();
        {
            let mut inner = store.inner.lock().unwrap();
            for uid in uids {
                inner
                    .indexes
                    .insert(uid.to_string(), DestinationHandle::new(*uid));
            }
        }
        store
    }

    pub fn as_dyn(self: &Arc<Self>) -> Arc<dyn DocumentStore> {
        self.clone()
    }

    // -- knobs ---------------------------------------------------------------

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_get_failure(&self, failure: Option<StoreError>) {
        self.inner.lock().unwrap().get_failure = failure;
    }

    pub fn set_list_failure(&self, failure: Option<StoreError>) {
        self.inner.lock().unwrap().list_failure = failure;
    }

    pub fn set_fail_creates(&self, fail: bool) {
        self.inner.lock().unwrap().fail_creates = fail;
    }

    /// Fail the next `n` document writes.
    pub fn fail_next_adds(&self, n: usize) {
        self.inner.lock().unwrap().failing_adds = n;
    }

    /// Fail the next `n` writes that carry the schema document, leaving data
    /// writes alone.
    pub fn fail_next_schema_writes(&self, n: usize) {
        self.inner.lock().unwrap().failing_schema_writes = n;
    }

    pub fn set_fail_all_adds(&self, fail: bool) {
        self.inner.lock().unwrap().fail_all_adds = fail;
    }

    pub fn set_create_delay(&self, delay: Duration) {
        self.inner.lock().unwrap().create_delay = delay;
    }

    pub fn set_health_delay(&self, delay: Duration) {
        self.inner.lock().unwrap().health_delay = delay;
    }

    /// Hold every document write until [`open_gate`](Self::open_gate).
    pub fn close_gate(&self) {
        self.gate.send_replace(false);
    }

    pub fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    // -- observations --------------------------------------------------------

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn add_calls(&self) -> usize {
        self.add_calls.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn index_uids(&self) -> Vec<String> {
        self.inner.lock().unwrap().indexes.keys().cloned().collect()
    }

    pub fn index(&self, uid: &str) -> Option<DestinationHandle> {
        self.inner.lock().unwrap().indexes.get(uid).cloned()
    }

    /// Data documents of `uid`, excluding the schema document.
    pub fn documents(&self, uid: &str) -> Vec<Record> {
        self.inner
            .lock()
            .unwrap()
            .documents
            .get(uid)
            .map(|docs| {
                docs.iter()
                    .filter(|(id, _)| id.as_str() != SCHEMA_DOCUMENT_ID)
                    .map(|(_, doc)| doc.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn schema(&self, uid: &str) -> Option<Record> {
        self.inner
            .lock()
            .unwrap()
            .documents
            .get(uid)
            .and_then(|docs| docs.get(SCHEMA_DOCUMENT_ID))
            .cloned()
    }

    /// Keys listed by the schema document of `uid`, in stored order.
    pub fn schema_keys(&self, uid: &str) -> Vec<String> {
        self.schema(uid)
            .and_then(|doc| doc.get("keys").cloned())
            .and_then(|keys| serde_json::from_value(keys).ok())
            .unwrap_or_default()
    }

    pub fn schema_writes(&self, uid: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .schema_writes
            .get(uid)
            .copied()
            .unwrap_or(0)
    }

    fn track_in_flight(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }
}

fn injected(what: &str) -> StoreError {
    StoreError::Api {
        status: 500,
        code: Some("internal".to_string()),
        message: format!("injected {what} failure"),
    }
}

fn carries_schema(documents: &[Record]) -> bool {
    documents
        .iter()
        .any(|doc| doc.get(ID_FIELD).and_then(Value::as_str) == Some(SCHEMA_DOCUMENT_ID))
}

#[async_trait]
impl DocumentStore for MockStore {
    async fn list_indexes(&self) -> Result<Vec<DestinationHandle>, StoreError> {
        let inner = self.inner.lock().unwrap();
        if let Some(err) = &inner.list_failure {
            return Err(err.clone());
        }
        Ok(inner.indexes.values().cloned().collect())
    }

    async fn get_index(&self, uid: &str) -> Result<DestinationHandle, StoreError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.lock().unwrap();
        if let Some(err) = &inner.get_failure {
            return Err(err.clone());
        }
        inner
            .indexes
            .get(uid)
            .cloned()
            .ok_or_else(|| StoreError::IndexNotFound {
                uid: uid.to_string(),
            })
    }

    async fn create_index(
        &self,
        uid: &str,
        primary_key: &str,
    ) -> Result<DestinationHandle, StoreError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let (delay, fail) = {
            let inner = self.inner.lock().unwrap();
            (inner.create_delay, inner.fail_creates)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(injected("create"));
        }
        let mut handle = DestinationHandle::new(uid);
        handle.primary_key = Some(primary_key.to_string());
        self.inner
            .lock()
            .unwrap()
            .indexes
            .insert(uid.to_string(), handle.clone());
        Ok(handle)
    }

    async fn add_or_replace_documents(
        &self,
        uid: &str,
        documents: &[Record],
    ) -> Result<(), StoreError> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        self.track_in_flight();
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let result = {
            let mut inner = self.inner.lock().unwrap();
            if inner.fail_all_adds {
                Err(injected("write"))
            } else if inner.failing_adds > 0 {
                inner.failing_adds -= 1;
                Err(injected("write"))
            } else if inner.failing_schema_writes > 0 && carries_schema(documents) {
                inner.failing_schema_writes -= 1;
                Err(injected("schema write"))
            } else {
                let stored = inner.documents.entry(uid.to_string()).or_default();
                let mut schema_written = false;
                for doc in documents {
                    let id = match doc.get(ID_FIELD) {
                        Some(Value::String(id)) => id.clone(),
                        Some(other) => other.to_string(),
                        None => continue,
                    };
                    schema_written |= id == SCHEMA_DOCUMENT_ID;
                    stored.insert(id, doc.clone());
                }
                if schema_written {
                    *inner.schema_writes.entry(uid.to_string()).or_default() += 1;
                }
                Ok(())
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn health(&self) -> Result<(), StoreError> {
        let delay = self.inner.lock().unwrap().health_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Transport("connection refused".to_string()))
        }
    }
}
