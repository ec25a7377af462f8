// main.rs — dedicated server entry point

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use bunker_server::config::ServerConfig;
use bunker_server::server::Server;

#[derive(Parser, Debug)]
#[command(name = "bunker-server", about = "Authoritative voxel shooter server")]
struct Args {
    /// Path to the TOML config; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured UDP port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the configured .vxl map path.
    #[arg(short, long)]
    map: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(map) = args.map {
        config.map = map;
    }

    let mut server = Server::new(config).context("starting server")?;
    server.run()
}
