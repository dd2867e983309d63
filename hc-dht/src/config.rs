//! Configuration for a constructed [`crate::Dht`] instance.
//!
//! A single [`DhtConfig`] is handed to [`crate::DhtBuilder`] once per
//! application instance — there is no process-global DHT singleton to
//! configure (see `DESIGN.md` for the reasoning).

use std::path::PathBuf;

use hc_gossip::GossipConfig;
use libp2p::Multiaddr;

/// Everything needed to stand up one DHT instance.
#[derive(Debug, Clone)]
pub struct DhtConfig {
    /// The DNA-bound string that scopes this DHT's wire protocol
    /// identifiers (`"<protoName>-<muxId>/0.0.0"`), so that multiple
    /// applications can coexist on one transport without cross-talk.
    pub mux_id: String,

    /// Directory the embedded change log store opens its environment in.
    pub store_path: PathBuf,

    /// Local multiaddr to listen on. `None` disables listening (outbound
    /// only — used by short-lived CLI invocations).
    pub listen_addr: Option<Multiaddr>,

    /// Peers to dial at startup.
    pub bootstrap_peers: Vec<Multiaddr>,

    /// Gossip engine and routing table tuning: neighborhood size, ticker
    /// period, bucket size, peer TTL.
    pub gossip: GossipConfig,
}

impl DhtConfig {
    pub fn new(mux_id: impl Into<String>, store_path: impl Into<PathBuf>) -> Self {
        DhtConfig {
            mux_id: mux_id.into(),
            store_path: store_path.into(),
            listen_addr: None,
            bootstrap_peers: Vec::new(),
            gossip: GossipConfig::default(),
        }
    }

    pub fn with_listen_addr(mut self, addr: Multiaddr) -> Self {
        self.listen_addr = Some(addr);
        self
    }

    pub fn with_bootstrap_peers(mut self, peers: Vec<Multiaddr>) -> Self {
        self.bootstrap_peers = peers;
        self
    }

    pub fn with_gossip(mut self, gossip: GossipConfig) -> Self {
        self.gossip = gossip;
        self
    }
}
