use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use webserv::config::Config;
use webserv::server::Server;
use webserv::server::shutdown::spawn_signal_listener;

/// Non-blocking HTTP/1.1 server with CGI support.
#[derive(Debug, Parser)]
#[command(name = "webserv", version, about)]
struct Cli {
    /// Path to the YAML configuration file
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load(&cli.config)?;
    if cli.check {
        tracing::info!(servers = config.servers.len(), "configuration OK");
        return Ok(());
    }

    let server = Server::bind(&config).context("starting server")?;
    spawn_signal_listener(server.shutdown_handle())?;
    server.run()
}
