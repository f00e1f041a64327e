//! Ingest service: the shared write path behind both inbound surfaces.
//!
//! ```text
//!   submit()  ── admit ── normalize ── spawn ─┐         (HTTP, fire and forget)
//!   save()    ── admit ── normalize ──────────┤         (plugin, awaited)
//!                                             ▼
//!                           write(): resolve ─► add documents ─► publish schema
//! ```
//!
//! Admission happens before any decoding. A token is held until the write it
//! admitted has finished, so the number of outstanding store writes never
//! exceeds the configured capacity. Background write failures are handed to
//! the error monitor; decode failures are the producer's fault and are not.

use std::sync::Arc;
use std::time::Duration;

use logdb_core::{normalize, sanitize_tag, Batch, Encoding, NormalizeError};
use logdb_store::{DocumentStore, StoreError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::admission::{AdmissionController, AdmissionToken, Busy};
use crate::monitor::ErrorReporter;
use crate::registry::IndexRegistry;

/// Why a payload was not accepted.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// Every write slot is taken but the store answers its health check.
    #[error("too many writes in flight (capacity {capacity})")]
    Saturated { capacity: usize },

    /// Every write slot is taken and the store is not answering.
    #[error("too many writes in flight and the store is unreachable: {0}")]
    StoreUnreachable(#[source] StoreError),

    /// The payload could not be decoded.
    #[error("invalid payload: {0}")]
    Rejected(#[from] NormalizeError),

    /// The breaker has tripped or the process is stopping.
    #[error("not accepting writes: shutting down")]
    ShuttingDown,

    /// An awaited write failed in the store.
    #[error("write failed: {0}")]
    Failed(#[source] StoreError),
}

/// What an awaited write did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSummary {
    pub uid: String,
    pub records: usize,
    pub schema_pushed: bool,
}

#[derive(Clone)]
pub struct IngestService {
    store: Arc<dyn DocumentStore>,
    registry: Arc<IndexRegistry>,
    admission: AdmissionController,
    errors: ErrorReporter,
    tasks: TaskTracker,
    operating: CancellationToken,
    default_tag: String,
    health_probe_timeout: Option<Duration>,
}

impl std::fmt::Debug for IngestService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestService")
            .field("registry", &self.registry)
            .field("admission", &self.admission)
            .field("in_background", &self.tasks.len())
            .field("default_tag", &self.default_tag)
            .finish_non_exhaustive()
    }
}

impl IngestService {
    /// `operating` stops intake when cancelled; it is normally the error
    /// monitor's operating token.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        registry: Arc<IndexRegistry>,
        admission: AdmissionController,
        errors: ErrorReporter,
        operating: CancellationToken,
        default_tag: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            admission,
            errors,
            tasks: TaskTracker::new(),
            operating,
            default_tag: default_tag.into(),
            health_probe_timeout: None,
        }
    }

    /// Bound the health check made when every write slot is taken. Without
    /// a bound the check lasts as long as the store client allows.
    pub fn with_health_probe_timeout(mut self, limit: Duration) -> Self {
        self.health_probe_timeout = Some(limit);
        self
    }

    pub fn registry(&self) -> &IndexRegistry {
        &self.registry
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Background writes not yet finished.
    pub fn in_background(&self) -> usize {
        self.tasks.len()
    }

    /// The destination uid for a producer tag. Tags with no alphanumeric
    /// characters go to the default destination.
    pub fn destination_for(&self, tag: &str) -> String {
        let uid = sanitize_tag(tag);
        if uid.is_empty() {
            self.default_tag.clone()
        } else {
            uid
        }
    }

    /// Accept a payload and write it in the background.
    ///
    /// Returns once the payload has been admitted and decoded; the store
    /// write happens afterwards and its failures go to the error monitor.
    pub async fn submit(
        &self,
        tag: &str,
        body: &[u8],
        encoding: Encoding,
    ) -> Result<(), SubmitError> {
        let token = self.admit().await?;
        let batch = normalize(body, encoding)?;
        let uid = self.destination_for(tag);
        debug!(%uid, records = batch.len(), %encoding, "payload accepted");

        let service = self.clone();
        self.tasks.spawn(async move {
            let result = service.write(&uid, batch).await;
            token.release();
            if let Err(err) = result {
                warn!(%uid, error = %err, "background write failed");
                service.errors.report(err);
            }
        });
        Ok(())
    }

    /// Accept a payload and wait for its write to finish.
    pub async fn save(
        &self,
        tag: &str,
        body: &[u8],
        encoding: Encoding,
    ) -> Result<WriteSummary, SubmitError> {
        let token = self.admit().await?;
        let batch = normalize(body, encoding)?;
        let uid = self.destination_for(tag);
        let result = self.write(&uid, batch).await;
        token.release();
        result.map_err(|err| {
            warn!(%uid, error = %err, "write failed");
            self.errors.report(err.clone());
            SubmitError::Failed(err)
        })
    }

    /// Resolve the destination, add the batch, then publish its schema.
    ///
    /// Only resolution and the data write decide the result. A schema write
    /// failure goes to the error monitor and shows as `schema_pushed: false`.
    pub async fn write(&self, tag: &str, batch: Batch) -> Result<WriteSummary, StoreError> {
        let uid = self.destination_for(tag);
        if batch.is_empty() {
            return Ok(WriteSummary {
                uid,
                records: 0,
                schema_pushed: false,
            });
        }

        let handle = self.registry.resolve(&uid).await?;
        self.store
            .add_or_replace_documents(&handle.uid, batch.records())
            .await?;
        // The records are stored at this point; a failed schema write must not
        // make the caller resend them. The destination stays flagged and the
        // next batch writes the schema again.
        let schema_pushed = match self.registry.publish_schema(&handle.uid, &batch).await {
            Ok(pushed) => pushed,
            Err(err) => {
                self.errors.report(err);
                false
            }
        };
        debug!(uid = %handle.uid, records = batch.len(), schema_pushed, "batch written");

        Ok(WriteSummary {
            uid: handle.uid,
            records: batch.len(),
            schema_pushed,
        })
    }

    /// Health of the downstream store.
    pub async fn health(&self) -> Result<(), StoreError> {
        self.store.health().await
    }

    /// Stop tracking new background writes and wait for the outstanding ones.
    pub async fn shutdown(&self) {
        self.tasks.close();
        if !self.tasks.is_empty() {
            debug!(pending = self.tasks.len(), "waiting for background writes");
        }
        self.tasks.wait().await;
    }

    async fn admit(&self) -> Result<AdmissionToken, SubmitError> {
        if self.operating.is_cancelled() {
            return Err(SubmitError::ShuttingDown);
        }
        match self.admission.try_acquire() {
            Ok(token) => Ok(token),
            Err(busy) => Err(self.overloaded(busy).await),
        }
    }

    /// Distinguish a saturated-but-healthy store from an unreachable one.
    ///
    /// The refusal is reported before the store is probed, so it is counted
    /// even if the caller gives up while the probe is pending. A probe that
    /// runs past `health_probe_timeout` counts as unreachable.
    async fn overloaded(&self, busy: Busy) -> SubmitError {
        let capacity = busy.capacity;
        self.errors
            .report(anyhow::Error::new(busy).context("payload refused"));

        let probe = match self.health_probe_timeout {
            Some(limit) => tokio::time::timeout(limit, self.store.health())
                .await
                .unwrap_or(Err(StoreError::Timeout(limit))),
            None => self.store.health().await,
        };
        let err = match probe {
            Ok(()) => SubmitError::Saturated { capacity },
            Err(health) => SubmitError::StoreUnreachable(health),
        };
        warn!(error = %err, "payload refused");
        err
    }
}
