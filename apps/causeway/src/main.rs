use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

use causeway::cli::{Cli, Commands};
use causeway::config::Config;
use causeway::liveness::LivenessMonitor;
use causeway::{router, BrokerState};

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "causeway=info");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    if let Some(Commands::Probe { url, command }) = cli.command {
        if let Err(err) = causeway::cli::run_probe(&url, command).await {
            error!("probe failed: {err:#}");
            std::process::exit(1);
        }
        return Ok(());
    }

    let config = Config::from_env();
    let state = BrokerState::new();

    let monitor = LivenessMonitor::new(
        state.connections.clone(),
        state.relay.clone(),
        Duration::from_secs(config.heartbeat_interval_seconds),
    );
    tokio::spawn(monitor.run());

    let app = router(state);
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("causeway broker listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
