//! sshrepl server binary entry point.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use sshrepl_server::{Cli, LineRepl, Server};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_format = cli.log_format.into();
    if let Err(e) = sshrepl_core::init_logging(cli.verbose, cli.log_file.as_deref(), log_format) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    info!(version = env!("CARGO_PKG_VERSION"), "sshrepl-server starting");

    let config = match cli.server_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            eprintln!("sshrepl-server: {}", e);
            std::process::exit(2);
        }
    };

    let server = match Server::bind(config, Arc::new(LineRepl)).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "failed to start server");
            eprintln!("sshrepl-server: {}", e);
            std::process::exit(2);
        }
    };
    eprintln!("sshrepl-server: listening on {}", server.local_addr());

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to wait for shutdown signal");
    }
    info!("shutting down");
    server.close();
    server.wait().await;
}
