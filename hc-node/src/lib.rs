//! Peer identity, message taxonomy, wire codec, and protocol multiplexer.
//!
//! This crate is deliberately store- and gossip-engine-agnostic: it defines
//! the [`node::Handler`] trait that absorbs inbound messages, but leaves the
//! concrete implementations wired to the change log store and gossip
//! engine to the facade crate that depends on all three.

pub mod error;
pub mod message;
pub mod node;
pub mod peer_id;
pub mod protocol;
pub mod wire;

pub use error::{Error, ErrorResponse, Result};
pub use message::{fingerprint, Body, Entry, Message, MsgType, Timestamp};
pub use node::{Handler, MessageCodec, Node, NodeBehaviour, Reply};
pub use peer_id::PeerId;
pub use protocol::ProtocolTag;
