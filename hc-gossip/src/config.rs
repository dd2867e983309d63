//! Configuration for the gossip engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the gossip engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipConfig {
    /// K used for gossip target selection: the size of the neighborhood
    /// drawn from, by XOR distance, for each gossip round.
    pub neighborhood_size: u32,

    /// Ticker period in milliseconds. `0` disables the ticker entirely.
    pub gossip_interval_ms: u64,

    /// Bucket size for the routing table.
    pub routing_table_k: u32,

    /// How long a discovered address stays in the peerstore, in seconds.
    pub peer_ttl_secs: u64,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            neighborhood_size: 8,
            gossip_interval_ms: 10_000,
            routing_table_k: 20,
            peer_ttl_secs: 600,
        }
    }
}

impl GossipConfig {
    pub fn gossip_interval(&self) -> Option<Duration> {
        if self.gossip_interval_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.gossip_interval_ms))
        }
    }

    pub fn peer_ttl(&self) -> Duration {
        Duration::from_secs(self.peer_ttl_secs)
    }
}

/// Builder for [`GossipConfig`].
#[derive(Debug, Default)]
pub struct GossipConfigBuilder {
    config: GossipConfig,
}

impl GossipConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn neighborhood_size(mut self, n: u32) -> Self {
        self.config.neighborhood_size = n;
        self
    }

    pub fn gossip_interval_ms(mut self, ms: u64) -> Self {
        self.config.gossip_interval_ms = ms;
        self
    }

    pub fn routing_table_k(mut self, k: u32) -> Self {
        self.config.routing_table_k = k;
        self
    }

    pub fn peer_ttl_secs(mut self, secs: u64) -> Self {
        self.config.peer_ttl_secs = secs;
        self
    }

    pub fn build(self) -> GossipConfig {
        self.config
    }
}
