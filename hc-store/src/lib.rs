//! The change log store: an append-only, gap-free log of absorbed
//! messages, plus the fingerprint and peer-watermark indices that let
//! gossip exchange suppress duplicate work.

mod error;
mod store;

pub use error::{Result, StoreError};
pub use store::{ChangeLogStore, Entry, PeerRecord};
