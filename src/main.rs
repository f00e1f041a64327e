use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use logdb_core::config::Config;

#[derive(Parser)]
#[command(name = "logdb", about = "Route structured logs into per-tag search indexes")]
struct Cli {
    /// TOML config file layered over the built-in defaults.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Log filter, overriding RUST_LOG and the configured level.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("error while loading config")?;
    logdb::logging::init(&config.logging, cli.log_level.as_deref())
        .context("error while configuring logger")?;
    tracing::info!(
        listen = %config.server.listen,
        store = %config.store.url,
        "starting logdb"
    );

    logdb::app::run(config).await
}
