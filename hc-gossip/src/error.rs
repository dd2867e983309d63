//! Error types for the gossip engine.

use displaydoc::Display;
use thiserror::Error;

#[derive(Debug, Display, Error)]
pub enum GossipError {
    /// no gossipers available in the neighborhood
    NoGossipersAvailable,

    /// expected a gossip request body
    ExpectedGossipReq,

    /// no such index: {0}
    NoSuchIndex(u64),

    /// store error: {0}
    Store(#[from] hc_store::StoreError),

    /// protocol error: {0}
    Protocol(#[from] hc_node::Error),

    /// transport error: {0}
    Transport(String),

    /// gossip channel closed
    ChannelClosed,
}

pub type GossipResult<T> = Result<T, GossipError>;
