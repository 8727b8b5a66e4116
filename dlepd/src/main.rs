use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use dlep_packet::ProtocolConfig;
use dlepd::dlep::{self, ClientChannel, ClientEvent, Dlep, DlepConfig};
use dlepd::dlep_info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Arg {
    #[arg(short, long, help = "Configuration file (YAML)")]
    config: Option<PathBuf>,

    #[arg(short, long, help = "Run as the modem side")]
    modem: bool,

    #[arg(long, help = "Connect to a peer at host:port")]
    connect: Option<String>,

    #[arg(short, long, help = "Session TCP port")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let arg = Arg::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = match &arg.config {
        Some(path) => DlepConfig::load(path)?,
        None => DlepConfig::default(),
    };
    if arg.modem {
        config.is_modem = true;
    }
    if let Some(connect) = arg.connect {
        config.connect = Some(connect);
    }
    if let Some(port) = arg.port {
        config.session_port = port;
    }

    let protocfg = Arc::new(ProtocolConfig::default_config());
    let mut client = ClientChannel::new();
    let dlep = Dlep::new(config, protocfg, client.tx.clone());
    dlep::serve(dlep);

    dlep_info!("dlepd started");

    // Reference embedder: report every protocol event.
    while let Some(event) = client.rx.recv().await {
        match event {
            ClientEvent::PeerUp { peer_info } => {
                dlep_info!(
                    "peer up {}",
                    serde_json::to_string(&peer_info).unwrap_or_default()
                );
            }
            ClientEvent::PeerDown { peer_id, reason } => {
                dlep_info!("peer down {} ({})", peer_id, reason);
            }
            ClientEvent::DestinationUp {
                peer_id,
                mac,
                data_items,
            } => {
                dlep_info!(
                    "destination up {} via peer {} ({} items)",
                    mac,
                    peer_id,
                    data_items.len()
                );
            }
            ClientEvent::DestinationUpdate {
                peer_id,
                mac,
                data_items,
            } => {
                dlep_info!(
                    "destination update {} via peer {} ({} items)",
                    mac,
                    peer_id,
                    data_items.len()
                );
            }
            ClientEvent::DestinationDown { peer_id, mac } => {
                dlep_info!("destination down {} via peer {}", mac, peer_id);
            }
            ClientEvent::PeerUpdate {
                peer_id,
                data_items,
            } => {
                dlep_info!("peer update from {} ({} items)", peer_id, data_items.len());
            }
        }
    }

    Ok(())
}
