//! The DHT facade: wires the change log store, routing table, protocol
//! multiplexer, and gossip engine behind one constructed handle.
//!
//! There is no process-global DHT instance (see `DESIGN.md` for the
//! rationale). [`DhtBuilder`] wires exactly one [`Dht`] per call to
//! [`DhtBuilder::build`], and every operation is a method on the handle
//! that returns.

pub mod config;
pub mod dht;
pub mod entry;
pub mod error;
pub mod handlers;
pub mod swarm;
pub mod validator;

pub use config::DhtConfig;
pub use dht::{Dht, DhtBuilder};
pub use entry::{EntryRecord, EntryStatus, EntryStore};
pub use error::{DhtError, DhtResult};
pub use validator::{AcceptAllValidator, Validator, Verdict};
