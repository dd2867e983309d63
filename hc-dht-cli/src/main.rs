//! Command-line driver for standing up and operating a single DHT node.
//!
//! Every subcommand builds its own [`Dht`] instance, performs one
//! operation (or, for `run`, idles until interrupted), and tears it down —
//! there is no persistent daemon process this binary talks to.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hc_dht::{Dht, DhtBuilder, DhtConfig};
use hc_hash::Hash;
use hc_node::PeerId;
use libp2p::Multiaddr;
use tracing::info;

#[derive(Parser)]
#[command(name = "hc-dht")]
#[command(about = "Operate a single node of the change-log/gossip DHT")]
#[command(version)]
struct Cli {
    /// Directory the embedded change log store opens its environment in.
    #[arg(short, long, default_value = "./hc-dht-data", env = "HC_DHT_STORE")]
    store: PathBuf,

    /// DNA-bound string scoping this DHT's wire protocol identifiers.
    #[arg(short, long, default_value = "default", env = "HC_DHT_MUX_ID")]
    mux_id: String,

    /// Local multiaddr to listen on.
    #[arg(short, long, env = "HC_DHT_LISTEN")]
    listen: Option<Multiaddr>,

    /// Peers to dial at startup.
    #[arg(short, long, env = "HC_DHT_BOOTSTRAP")]
    bootstrap: Vec<Multiaddr>,

    /// Enable verbose (debug-level) logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a node: listen, gossip, and serve requests until interrupted.
    Run,

    /// Store a UTF-8 string as an entry and witness it to a peer.
    Put {
        /// Free-form entry type tag.
        #[arg(long, default_value = "raw")]
        entry_type: String,
        /// The entry's content, as a UTF-8 string.
        data: String,
        /// Peer to witness the put to.
        to: PeerIdArg,
    },

    /// Read an entry from the local content index.
    Get { hash: HashArg },

    /// Mark an entry deleted and witness it to a peer.
    Delete { hash: HashArg, to: PeerIdArg },

    /// Mark an entry modified (superseded by another hash).
    Modify {
        hash: HashArg,
        replacement: HashArg,
        to: PeerIdArg,
    },

    /// Add a link from `base` to `link` under `tag`.
    Link {
        base: HashArg,
        link: HashArg,
        tag: String,
        to: PeerIdArg,
    },

    /// Remove a previously added link.
    DeleteLink {
        base: HashArg,
        link: HashArg,
        tag: String,
        to: PeerIdArg,
    },

    /// List the links from `base` under `tag`.
    GetLink { base: HashArg, tag: String },

    /// Ask `via` for the peers nearest `target`.
    FindNode { target: HashArg, via: PeerIdArg },

    /// Block a peer: witnessed to the change log so the block persists
    /// across restarts and replicates to the neighborhood by gossip.
    Block {
        peer: PeerIdArg,
        /// Free-form reason recorded alongside the block.
        #[arg(long, default_value = "blocked via CLI")]
        warrant: String,
    },

    /// Unblock a previously blocked peer.
    Unblock { peer: PeerIdArg },
}

/// A thin `clap`-parseable wrapper so `Hash`'s bs58 [`FromStr`] impl can be
/// used directly as a positional argument type.
#[derive(Clone, Copy)]
struct HashArg(Hash);

impl FromStr for HashArg {
    type Err = hc_hash::HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(HashArg(Hash::from_str(s)?))
    }
}

#[derive(Clone, Copy)]
struct PeerIdArg(PeerId);

impl FromStr for PeerIdArg {
    type Err = libp2p::identity::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(PeerIdArg(PeerId::from_str(s)?))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let mut config = DhtConfig::new(cli.mux_id.clone(), cli.store.clone());
    if let Some(addr) = cli.listen.clone() {
        config = config.with_listen_addr(addr);
    }
    if !cli.bootstrap.is_empty() {
        config = config.with_bootstrap_peers(cli.bootstrap.clone());
    }

    let dht = DhtBuilder::new(config).build().await.context("failed to build DHT")?;
    info!(peer = %dht.local_peer(), "node started");

    match cli.command {
        Commands::Run => run_until_interrupted(dht).await?,
        Commands::Put { entry_type, data, to } => {
            let hash = dht.put(entry_type, data.into_bytes(), to.0).await?;
            println!("{hash}");
            dht.shutdown().await;
        }
        Commands::Get { hash } => {
            let record = dht.get(hash.0)?;
            println!("{}", String::from_utf8_lossy(&record.data));
            dht.shutdown().await;
        }
        Commands::Delete { hash, to } => {
            dht.delete(hash.0, to.0).await?;
            dht.shutdown().await;
        }
        Commands::Modify { hash, replacement, to } => {
            dht.modify(hash.0, replacement.0, to.0).await?;
            dht.shutdown().await;
        }
        Commands::Link { base, link, tag, to } => {
            dht.link(base.0, link.0, tag, to.0).await?;
            dht.shutdown().await;
        }
        Commands::DeleteLink { base, link, tag, to } => {
            dht.delete_link(base.0, link.0, tag, to.0).await?;
            dht.shutdown().await;
        }
        Commands::GetLink { base, tag } => {
            for link in dht.get_link(base.0, &tag) {
                println!("{link}");
            }
            dht.shutdown().await;
        }
        Commands::FindNode { target, via } => {
            for peer in dht.find_node(target.0, via.0).await? {
                println!("{peer}");
            }
            dht.shutdown().await;
        }
        Commands::Block { peer, warrant } => {
            dht.add_to_list(hc_dht::handlers::BLOCKED_LIST, vec![(peer.0, warrant)])?;
            dht.shutdown().await;
        }
        Commands::Unblock { peer } => {
            dht.unblock(peer.0);
            dht.shutdown().await;
        }
    }

    Ok(())
}

/// Idles until Ctrl-C, keeping the swarm and gossip tasks alive so the node
/// serves inbound requests and participates in gossip.
async fn run_until_interrupted(dht: Dht) -> Result<()> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let mut tx = Some(tx);
    ctrlc::set_handler(move || {
        if let Some(tx) = tx.take() {
            let _ = tx.send(());
        }
    })
    .context("failed to install Ctrl-C handler")?;

    info!("serving requests; press Ctrl-C to stop");
    let _ = rx.await;
    info!("shutting down");
    dht.shutdown().await;
    Ok(())
}
