mod server;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use huddle_core::{bootstrap, logging, Config};
use huddle_sfu::{LocalRouter, Registry, SfuConfig};

use server::HuddleServer;

#[derive(Parser, Debug)]
#[command(name = "huddle")]
#[command(about = "Huddle conferencing signaling server", long_about = None)]
struct Args {
    /// Config file path (otherwise discovered, see HUDDLE_CONFIG_PATH)
    #[arg(long, short)]
    config: Option<String>,
}

/// Media router settings derived from the application config
fn sfu_config(config: &Config) -> SfuConfig {
    SfuConfig {
        max_rooms: config.session.max_rooms,
        max_peers_per_room: config.session.max_peers_per_room,
        listen_ip: config.media.listen_ip.clone(),
        announced_ip: config.media.announced_ip.clone(),
        rtc_min_port: config.media.rtc_min_port,
        rtc_max_port: config.media.rtc_max_port,
        enable_udp: config.media.enable_udp,
        enable_tcp: config.media.enable_tcp,
        prefer_udp: config.media.prefer_udp,
        ..SfuConfig::default()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load and validate configuration
    let config = match args.config.as_deref() {
        Some(path) => bootstrap::load_config_from(Some(path))?,
        None => bootstrap::load_config()?,
    };

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Huddle server starting...");
    info!("HTTP address: {}", config.http_address());

    // 3. Media router and registry
    let sfu_config = sfu_config(&config);
    let router = Arc::new(LocalRouter::new(sfu_config.clone()));
    let registry = Arc::new(Registry::new(&sfu_config));
    info!(
        max_rooms = sfu_config.max_rooms,
        max_peers_per_room = sfu_config.max_peers_per_room,
        "Room registry initialized"
    );

    // 4. Serve until shutdown
    HuddleServer::new(config, registry, router).start().await
}
