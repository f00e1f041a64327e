//! Output-plugin adapter for a streaming log shipper.
//!
//! The host drives the plugin synchronously: `register` once, `init` with
//! configuration, `flush` for every chunk of msgpack `[timestamp, record]`
//! pairs, and `exit` at shutdown. Each call is translated onto the same
//! [`IngestService`] write path the HTTP intake uses, on a runtime owned by
//! the plugin.
//!
//! A flush awaits its write. Status codes follow the host's convention:
//!
//! | Outcome                                    | Status  |
//! |--------------------------------------------|---------|
//! | written                                    | `Ok`    |
//! | undecodable chunk                          | `Error` |
//! | saturated, store down, breaker tripped     | `Retry` |

use std::sync::Arc;

use anyhow::Context;
use logdb_core::config::Config;
use logdb_core::Encoding;
use logdb_store::{DocumentStore, MeiliClient};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::admission::AdmissionController;
use crate::monitor::{ErrorMonitor, MonitorConfig};
use crate::registry::IndexRegistry;
use crate::service::{IngestService, SubmitError};

/// Result of one host call.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStatus {
    Error = 0,
    Ok = 1,
    Retry = 2,
}

impl FlushStatus {
    /// The integer the host expects.
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl From<&SubmitError> for FlushStatus {
    fn from(err: &SubmitError) -> Self {
        match err {
            SubmitError::Rejected(_) => Self::Error,
            SubmitError::Saturated { .. }
            | SubmitError::StoreUnreachable(_)
            | SubmitError::ShuttingDown
            | SubmitError::Failed(_) => Self::Retry,
        }
    }
}

/// What the plugin announces to the host at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginDefinition {
    pub name: &'static str,
    pub description: &'static str,
}

pub struct OutputPlugin {
    runtime: Runtime,
    service: IngestService,
    monitor: ErrorMonitor,
    root: CancellationToken,
}

impl std::fmt::Debug for OutputPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputPlugin")
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl OutputPlugin {
    pub const NAME: &'static str = "logdb";

    pub fn register() -> PluginDefinition {
        PluginDefinition {
            name: Self::NAME,
            description: "Write records to per-tag document-search indexes",
        }
    }

    /// Connect to the store named in `config` and warm the index cache.
    pub fn init(config: &Config) -> anyhow::Result<Self> {
        let store = MeiliClient::new(&config.store).context("error while configuring store client")?;
        Self::with_store(config, Arc::new(store))
    }

    /// Like [`init`](Self::init), against an arbitrary store.
    pub fn with_store(config: &Config, store: Arc<dyn DocumentStore>) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("logdb-plugin")
            .build()
            .context("error while starting plugin runtime")?;

        let root = CancellationToken::new();
        let parent = root.clone();
        let (service, monitor) = runtime.block_on(async move {
            let (monitor, errors) = ErrorMonitor::spawn(&parent, MonitorConfig::from(&config.breaker));
            let registry = IndexRegistry::bootstrap(store.clone())
                .await
                .context("error while listing indexes")?;
            let service = IngestService::new(
                store,
                Arc::new(registry),
                AdmissionController::new(config.server.max_connections),
                errors,
                monitor.operating_token(),
                config.ingest.default_tag.clone(),
            );
            anyhow::Ok((service, monitor))
        })?;

        info!(plugin = Self::NAME, "plugin initialized");
        Ok(Self {
            runtime,
            service,
            monitor,
            root,
        })
    }

    pub fn service(&self) -> &IngestService {
        &self.service
    }

    /// Write one chunk of msgpack `[timestamp, record]` pairs to `tag`.
    pub fn flush(&self, tag: &str, data: &[u8]) -> FlushStatus {
        match self
            .runtime
            .block_on(self.service.save(tag, data, Encoding::MsgPack))
        {
            Ok(summary) => {
                debug!(uid = %summary.uid, records = summary.records, "chunk flushed");
                FlushStatus::Ok
            }
            Err(err) => {
                let status = FlushStatus::from(&err);
                warn!(tag, error = %err, ?status, "chunk not flushed");
                status
            }
        }
    }

    /// Whether the error monitor has stopped intake.
    pub fn is_tripped(&self) -> bool {
        self.monitor.is_tripped()
    }

    /// Stop intake, wait for outstanding writes and shut the runtime down.
    pub fn exit(self) -> FlushStatus {
        let Self {
            runtime,
            service,
            monitor,
            root,
        } = self;
        runtime.block_on(async {
            service.shutdown().await;
            root.cancel();
            monitor.join().await;
        });
        info!(plugin = Self::NAME, "plugin stopped");
        FlushStatus::Ok
    }
}
