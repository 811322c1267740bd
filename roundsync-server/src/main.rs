use clap::{Parser, Subcommand};
use roundsync_http::serve;
use roundsync_replication::{NodeConfig, PeerConfig};
use std::path::Path;

#[derive(Parser)]
#[command(name = "roundsync")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[arg(long, env = "ROUNDSYNC_DATA_DIR", default_value = "./data")]
    data_dir: String,
    #[arg(long, env = "ROUNDSYNC_BIND_ADDR", default_value = "127.0.0.1:7800")]
    bind_addr: String,
}

#[derive(Subcommand)]
enum Command {
    /// Write {data_dir}/node.json for this node
    Init {
        #[arg(long)]
        node_id: String,
        /// Peer as `node_id=http://host:port`; repeatable
        #[arg(long = "peer")]
        peers: Vec<String>,
    },
}

fn parse_peer(spec: &str) -> Result<PeerConfig, String> {
    let (node_id, addr) = spec
        .split_once('=')
        .ok_or_else(|| format!("peer '{}' must look like node_id=http://host:port", spec))?;
    if node_id.is_empty() || addr.is_empty() {
        return Err(format!("peer '{}' has an empty node id or address", spec));
    }
    Ok(PeerConfig {
        node_id: node_id.to_string(),
        addr: addr.to_string(),
    })
}

fn run_init(
    data_dir: &Path,
    node_id: String,
    bind_addr: String,
    peers: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let peers = peers
        .iter()
        .map(|p| parse_peer(p))
        .collect::<Result<Vec<_>, _>>()?;
    let config = NodeConfig {
        node_id,
        bind_addr,
        peers,
        sync: None,
    };

    std::fs::create_dir_all(data_dir)?;
    let path = data_dir.join("node.json");
    std::fs::write(&path, serde_json::to_string_pretty(&config)?)?;
    eprintln!(
        "Wrote {} ({} with {} peers)",
        path.display(),
        config.node_id,
        config.peers.len()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Init { node_id, peers }) => {
            run_init(Path::new(&cli.data_dir), node_id, cli.bind_addr, &peers)
        }
        None => {
            std::env::set_var("ROUNDSYNC_DATA_DIR", &cli.data_dir);
            std::env::set_var("ROUNDSYNC_BIND_ADDR", &cli.bind_addr);
            serve().await
        }
    }
}
