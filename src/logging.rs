//! Process-wide `tracing` subscriber.

use anyhow::anyhow;
use logdb_core::config::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// The filter comes from `override_level` if given, else `RUST_LOG`, else the
/// configured level. Fails if a subscriber is already installed.
pub fn init(config: &LoggingConfig, override_level: Option<&str>) -> anyhow::Result<()> {
    let filter = match override_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&config.level)?,
        },
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match config.format {
        LogFormat::Console => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|e| anyhow!(e))
}
