use std::net::SocketAddr;

use anyhow::Result;
use clap::Parser;
use tokio::time::{self, Duration};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use kadmium::Node;

#[derive(Parser, Debug)]
#[command(name = "kadmium")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind the UDP socket to.
    #[arg(short, long, default_value = "0.0.0.0:0")]
    bind: SocketAddr,

    /// Known peers to join the network through. May be repeated.
    #[arg(short = 'B', long = "bootstrap", value_name = "ADDR")]
    bootstrap: Vec<SocketAddr>,

    /// Seconds between routing-table stats log lines.
    #[arg(short, long, default_value = "300")]
    stats_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let node = Node::bind(args.bind).await?;
    info!("node identifier: {}", node.local_id());
    info!("listening on {}", node.local_addr());

    if !args.bootstrap.is_empty() {
        match node.bootstrap(&args.bootstrap).await {
            Ok(found) => info!(peers = found.len(), "bootstrap complete"),
            Err(e) => warn!(error = %e, "bootstrap failed"),
        }
    }

    let mut interval = time::interval(Duration::from_secs(args.stats_interval));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal, exiting");
                break;
            }
            _ = interval.tick() => {
                info!(
                    contacts = node.contact_count().await,
                    stored_keys = node.stored_keys().await,
                    "routing table stats"
                );
            }
        }
    }

    node.close().await;
    Ok(())
}
