//! Error type for the DHT facade: aggregates the lower layers' errors plus
//! the few conditions that only arise at the facade (e.g. a shut-down
//! swarm task).

use displaydoc::Display;
use thiserror::Error;

#[derive(Debug, Display, Error)]
pub enum DhtError {
    /// store error: {0}
    Store(#[from] hc_store::StoreError),

    /// protocol error: {0}
    Protocol(#[from] hc_node::Error),

    /// gossip error: {0}
    Gossip(#[from] hc_gossip::GossipError),

    /// transport error: {0}
    Transport(String),

    /// the swarm driver task is no longer running
    SwarmGone,

    /// no peer is known to route this hash toward
    NoRoute,

    /// entry not found for the given hash
    HashNotFound,

    /// entry has been deleted
    HashDeleted,

    /// entry has been modified; payload carries the replacement hash
    HashModified(hc_hash::Hash),

    /// entry was rejected by validation: {0}
    HashRejected(String),

    /// no link found for the given base and tag
    LinkNotFound,
}

pub type DhtResult<T> = std::result::Result<T, DhtError>;

impl From<DhtError> for hc_node::Error {
    /// Maps a facade-level error onto the wire's closed error taxonomy so
    /// handlers can return it from [`hc_node::Handler::handle`].
    fn from(err: DhtError) -> Self {
        match err {
            DhtError::HashNotFound => hc_node::Error::HashNotFound,
            DhtError::HashDeleted => hc_node::Error::HashDeleted,
            DhtError::HashModified(replacement) => hc_node::Error::HashModified(replacement),
            DhtError::HashRejected(_) => hc_node::Error::HashRejected,
            DhtError::LinkNotFound => hc_node::Error::LinkNotFound,
            other => hc_node::Error::Other(other.to_string()),
        }
    }
}
