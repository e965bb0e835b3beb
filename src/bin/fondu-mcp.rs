use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fondu_mcp::cli::{Cli, Command};
use fondu_mcp::http_transport::{run_http_server, AppState};
use fondu_mcp::{Server, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let transport = cli.transport();
    let config = ServerConfig::from(cli.server);

    // Logs go to stderr; stdout carries the stdio transport.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(config.log_directive().parse()?))
        .with_writer(std::io::stderr)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), environment = %config.environment, "Starting fondu-mcp");

    let server = Server::from_config(&config);

    match transport {
        Command::Stdio => server.run().await,
        Command::Http => {
            let app_state = AppState::from_config(Arc::new(server), &config);
            run_http_server(config.bind_addr(), app_state).await
        }
    }
}
