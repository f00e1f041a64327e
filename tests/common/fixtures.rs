//! Payload builders and service wiring shared across harnesses.

use std::sync::Arc;
use std::time::Duration;

use logdb::{AdmissionController, ErrorMonitor, IndexRegistry, IngestService, MonitorConfig};
use logdb_core::config::{Config, StoreConfig};
use rmpv::Value as Msg;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::mock_store::MockStore;

/// A representative structured record.
pub fn sample_record() -> Value {
    serde_json::json!({
        "level": "info",
        "message": "request served",
        "status": 200,
        "latency_ms": 12.5,
        "labels": { "service": "checkout", "region": "eu-west-1" },
    })
}

/// Defaults with a tiny breaker window and a short store timeout.
pub fn test_config() -> Config {
    let mut config = Config::defaults();
    config.server.listen = "127.0.0.1:0".to_string();
    config.server.max_connections = 8;
    config.breaker.max_error_count = 100;
    config
}

pub fn store_config(url: &str) -> StoreConfig {
    StoreConfig {
        url: url.to_string(),
        timeout_ms: 500,
        ..StoreConfig::default()
    }
}

/// A running service over `store` plus the handles tests need to drive it.
pub struct Harness {
    pub service: IngestService,
    pub monitor: ErrorMonitor,
    pub root: CancellationToken,
}

impl Harness {
    pub fn new(store: &Arc<MockStore>, capacity: usize) -> Self {
        Self::with_breaker(store, capacity, 100)
    }

    pub fn with_breaker(store: &Arc<MockStore>, capacity: usize, max_error_count: u32) -> Self {
        let root = CancellationToken::new();
        let (monitor, errors) = ErrorMonitor::spawn(
            &root,
            MonitorConfig {
                max_error_count,
                reset_interval: Duration::from_secs(600),
            },
        );
        let registry = Arc::new(IndexRegistry::new(store.as_dyn()));
        let service = IngestService::new(
            store.as_dyn(),
            registry,
            AdmissionController::new(capacity),
            errors,
            monitor.operating_token(),
            "default",
        );
        Self {
            service,
            monitor,
            root,
        }
    }

    /// Drain background writes and stop the monitor.
    pub async fn finish(self) -> ErrorMonitor {
        self.service.shutdown().await;
        self.root.cancel();
        self.monitor
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    condition()
}

// ---------------------------------------------------------------------------
// msgpack payloads
// ---------------------------------------------------------------------------

/// A streaming-format event time: 4-byte seconds then 4-byte nanoseconds.
pub fn event_time(secs: u32, nanos: u32) -> Msg {
    let mut data = Vec::with_capacity(8);
    data.extend_from_slice(&secs.to_be_bytes());
    data.extend_from_slice(&nanos.to_be_bytes());
    Msg::Ext(0, data)
}

/// Convert a JSON value into its msgpack equivalent.
pub fn to_msgpack(value: &Value) -> Msg {
    match value {
        Value::Null => Msg::Nil,
        Value::Bool(b) => Msg::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Msg::from(i)
            } else if let Some(u) = n.as_u64() {
                Msg::from(u)
            } else {
                Msg::F64(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => Msg::from(s.as_str()),
        Value::Array(items) => Msg::Array(items.iter().map(to_msgpack).collect()),
        Value::Object(map) => Msg::Map(
            map.iter()
                .map(|(k, v)| (Msg::from(k.as_str()), to_msgpack(v)))
                .collect(),
        ),
    }
}

/// Encode a stream of `[timestamp, record]` entries back to back.
pub fn msgpack_stream(entries: &[(Msg, Value)]) -> Vec<u8> {
    let mut buf = Vec::new();
    for (ts, record) in entries {
        let entry = Msg::Array(vec![ts.clone(), to_msgpack(record)]);
        rmpv::encode::write_value(&mut buf, &entry).unwrap();
    }
    buf
}
