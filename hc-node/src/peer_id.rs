//! Peer identity: a thin wrapper around [`libp2p::PeerId`] that also knows
//! how to become a [`Hash`] for distance calculations.

use hc_hash::Hash;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An opaque peer identifier, derived from a public key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(libp2p::PeerId);

impl PeerId {
    pub fn new(inner: libp2p::PeerId) -> Self {
        PeerId(inner)
    }

    pub fn inner(&self) -> libp2p::PeerId {
        self.0
    }

    /// Hashes this peer's canonical byte encoding to produce a [`Hash`] for
    /// XOR-distance calculations in the routing table and neighborhood
    /// selection.
    pub fn to_hash(&self) -> Hash {
        Hash::from_peer_bytes(&self.0.to_bytes())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

impl FromStr for PeerId {
    type Err = libp2p::identity::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(PeerId(libp2p::PeerId::from_str(s)?))
    }
}

impl From<libp2p::PeerId> for PeerId {
    fn from(inner: libp2p::PeerId) -> Self {
        PeerId(inner)
    }
}

impl Serialize for PeerId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&self.0.to_bytes())
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        let inner = libp2p::PeerId::from_bytes(&bytes).map_err(serde::de::Error::custom)?;
        Ok(PeerId(inner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_hash_is_deterministic() {
        let id = PeerId::new(libp2p::PeerId::random());
        assert_eq!(id.to_hash(), id.to_hash());
    }

    #[test]
    fn distinct_peers_hash_differently() {
        let a = PeerId::new(libp2p::PeerId::random());
        let b = PeerId::new(libp2p::PeerId::random());
        assert_ne!(a.to_hash(), b.to_hash());
    }

    #[test]
    fn serde_round_trip() {
        let id = PeerId::new(libp2p::PeerId::random());
        let bytes = serde_cbor::to_vec(&id).unwrap();
        let back: PeerId = serde_cbor::from_slice(&bytes).unwrap();
        assert_eq!(id, back);
    }
}
