//! Error monitor: a circuit breaker over background write failures.
//!
//! ```text
//!   writers ──report()──▶ ErrorReporter ──mpsc──▶ monitor task
//!                                                   │  count += 1
//!                                                   │  count > max ─▶ cancel operating token
//!                                   reset ticker ──▶│  count = 0
//!   parent token cancelled ────────────────────────▶ exit
//! ```
//!
//! Counting is a fixed window: every `reset_interval` the counter goes back to
//! zero whatever its value. A burst straddling a boundary can therefore
//! exceed `max_error_count` in wall-clock terms without tripping.
//!
//! Once tripped the monitor stays tripped. The operating token it hands out
//! is a child of the parent token, so parent cancellation also cancels it.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use logdb_core::config::BreakerConfig;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Errors tolerated per window; the next one trips the breaker.
    pub max_error_count: u32,
    pub reset_interval: Duration,
}

impl From<&BreakerConfig> for MonitorConfig {
    fn from(config: &BreakerConfig) -> Self {
        Self {
            max_error_count: config.max_error_count,
            reset_interval: config.reset_interval(),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    errors: AtomicU32,
    tripped: AtomicBool,
}

/// Cheap, cloneable handle for reporting failures. Never blocks.
#[derive(Debug, Clone)]
pub struct ErrorReporter {
    tx: mpsc::Sender<anyhow::Error>,
}

impl ErrorReporter {
    /// Hand one failure to the monitor. Events that cannot be queued are
    /// dropped; the queue holds more than a full window, so a dropped event
    /// means the breaker is already about to trip or has stopped.
    pub fn report(&self, err: impl Into<anyhow::Error>) {
        let err = err.into();
        if let Err(dropped) = self.tx.try_send(err) {
            debug!(error = %dropped.into_inner(), "error event dropped");
        }
    }
}

/// Owner side of the monitor task.
#[derive(Debug)]
pub struct ErrorMonitor {
    counters: Arc<Counters>,
    operating: CancellationToken,
    handle: JoinHandle<()>,
}

impl ErrorMonitor {
    /// Start the monitor under `parent`. Must be called within a Tokio runtime.
    pub fn spawn(parent: &CancellationToken, config: MonitorConfig) -> (Self, ErrorReporter) {
        let capacity = config.max_error_count.saturating_add(1).max(1) as usize;
        let (tx, rx) = mpsc::channel(capacity);
        let counters = Arc::new(Counters::default());
        let operating = parent.child_token();

        let handle = tokio::spawn(run(
            rx,
            parent.clone(),
            operating.clone(),
            counters.clone(),
            config,
        ));

        let monitor = Self {
            counters,
            operating,
            handle,
        };
        (monitor, ErrorReporter { tx })
    }

    /// Cancelled when the breaker trips or the parent is cancelled.
    pub fn operating_token(&self) -> CancellationToken {
        self.operating.clone()
    }

    /// Errors counted in the current window.
    pub fn error_count(&self) -> u32 {
        self.counters.errors.load(Ordering::Acquire)
    }

    pub fn is_tripped(&self) -> bool {
        self.counters.tripped.load(Ordering::Acquire)
    }

    /// Wait for the monitor task to exit. It exits once the parent token is
    /// cancelled or every reporter has been dropped.
    pub async fn join(self) {
        if let Err(err) = self.handle.await {
            warn!(error = %err, "error monitor task failed");
        }
    }
}

async fn run(
    mut rx: mpsc::Receiver<anyhow::Error>,
    parent: CancellationToken,
    operating: CancellationToken,
    counters: Arc<Counters>,
    config: MonitorConfig,
) {
    let period = config.reset_interval.max(Duration::from_millis(1));
    let mut reset = interval_at(Instant::now() + period, period);
    reset.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = parent.cancelled() => break,
            event = rx.recv() => {
                let Some(err) = event else { break };
                let count = counters.errors.fetch_add(1, Ordering::AcqRel).saturating_add(1);
                warn!(error = %format!("{err:#}"), count, "write error");
                if count > config.max_error_count
                    && !counters.tripped.swap(true, Ordering::AcqRel)
                {
                    error!(
                        count,
                        max = config.max_error_count,
                        "error threshold exceeded, stopping intake"
                    );
                    operating.cancel();
                }
            }
            _ = reset.tick() => {
                let cleared = counters.errors.swap(0, Ordering::AcqRel);
                if cleared > 0 {
                    debug!(cleared, "error window reset");
                }
            }
        }
    }
    info!("error monitor stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
