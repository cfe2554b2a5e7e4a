use anyhow::{Context, Result};
use clap::Parser;

use filevault::cli::DaemonOpts;
use filevault::config::ServerConfig;
use filevault::server::Server;

fn main() -> Result<()> {
    filevault::init_tracing("info");
    let opts = DaemonOpts::parse();
    let config = ServerConfig::from_opts(&opts)?;

    if config.bind.starts_with("0.0.0.0") {
        tracing::warn!(
            bind = %config.bind,
            "binding to all interfaces; the protocol has no authentication or encryption"
        );
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(async {
        let server = Server::bind(&config).await?;
        tracing::info!(
            data_dir = %config.data_dir.display(),
            registry = %config.registry_path.display(),
            "Server started!"
        );
        let report = server.run_until_ctrl_c().await?;
        tracing::info!(
            entries = report.entries,
            persisted = report.persisted,
            aborted = report.aborted,
            "server stopped"
        );
        Ok::<(), anyhow::Error>(())
    })
}
