//! Process lifecycle for the standalone server.

use std::sync::Arc;

use anyhow::Context;
use logdb_core::config::Config;
use logdb_store::{DocumentStore, MeiliClient};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::admission::AdmissionController;
use crate::api;
use crate::monitor::{ErrorMonitor, MonitorConfig};
use crate::registry::IndexRegistry;
use crate::service::IngestService;

/// Run the intake server until a termination signal arrives or the error
/// monitor trips. A trip is reported as an error so the process exits
/// non-zero.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let store = MeiliClient::new(&config.store).context("error while configuring store client")?;
    run_with_store(config, Arc::new(store), shutdown_signal()).await
}

/// [`run`] against an arbitrary store, stopping when `stop` completes.
pub async fn run_with_store(
    config: Config,
    store: Arc<dyn DocumentStore>,
    stop: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let root = CancellationToken::new();
    let signalled = root.clone();
    tokio::spawn(async move {
        stop.await;
        info!("termination requested");
        signalled.cancel();
    });

    let (monitor, errors) = ErrorMonitor::spawn(&root, MonitorConfig::from(&config.breaker));
    let operating = monitor.operating_token();

    let registry = match IndexRegistry::bootstrap(store.clone()).await {
        Ok(registry) => registry,
        Err(err) => {
            root.cancel();
            monitor.join().await;
            return Err(err).context("error while listing indexes");
        }
    };

    let service = IngestService::new(
        store,
        Arc::new(registry),
        AdmissionController::new(config.server.max_connections),
        errors,
        operating.clone(),
        config.ingest.default_tag.clone(),
    );

    let served = api::serve(&config.server, service.clone(), operating).await;
    info!("stopping app");
    service.shutdown().await;

    let tripped = monitor.is_tripped();
    root.cancel();
    monitor.join().await;

    served?;
    if tripped {
        error!("exiting after too many write errors");
        anyhow::bail!("error threshold exceeded");
    }
    info!("app stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "error while listening for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "error while listening for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
