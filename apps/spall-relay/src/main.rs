use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing::info;

use spall_relay::{
    config::{Cli, Commands, ServerConfig},
    server::RelayServer,
    service::RelayService,
    telemetry::{self, Telemetry},
    upload,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Send { file, addr }) = cli.command {
        telemetry::init_tracing()?;
        upload::send_trace(&addr, &file).await?;
        return Ok(());
    }

    let telemetry = Telemetry::init()?;
    let config = ServerConfig::try_from(cli.server)?;
    info!(
        ingest_addr = %config.ingest_addr,
        http_addr = %config.http_addr,
        max_ingest_bytes = config.max_ingest_bytes,
        "starting spall-relay"
    );

    let service = Arc::new(
        RelayService::new(config.max_ingest_bytes).with_metrics(telemetry.metrics_handle()),
    );
    let server = RelayServer::bind(&config, service).await?;
    server.serve(shutdown_signal()).await?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
