//! The gossip engine: picks a gossiper from the neighborhood, exchanges
//! index watermarks, fetches unseen change-log entries, and re-dispatches
//! them to the Action protocol for side-effecting application.

pub mod config;
pub mod engine;
pub mod error;

pub use config::{GossipConfig, GossipConfigBuilder};
pub use engine::{ActionDispatcher, GossipEngine, GossipHandle, GossipTransport};
pub use error::{GossipError, GossipResult};
