//! 256-bit content hashes and the XOR distance metric used throughout the DHT.
//!
//! A [`Hash`] is a multi-codec-tagged digest: a one-byte codec tag followed by
//! a fixed-width digest. The only codec implemented today is SHA2-256, but the
//! tag is carried so that a future codec can be introduced without changing
//! the wire shape. Hashes round-trip through a base58btc string
//! representation (`Qm...`-style) for human-readable logging and for parity
//! with the reference network's string encoding of identifiers.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Codec tag for a SHA2-256 digest.
pub const SHA2_256: u8 = 0x12;
/// Digest length in bytes for SHA2-256.
pub const DIGEST_LEN: usize = 32;
/// Sentinel codec tag used only by [`Hash::null`]; never produced by [`Hash::of`].
const NULL_CODE: u8 = 0x00;

/// Errors that can occur decoding a hash from its string or byte form.
#[derive(Debug, displaydoc::Display, PartialEq, Eq, Clone)]
pub enum HashError {
    /// invalid base58 encoding: {0}
    Base58(String),
    /// expected {DIGEST_LEN}-byte digest, got {0} bytes
    BadLength(usize),
}

impl std::error::Error for HashError {}

/// A 256-bit content identifier: a codec tag plus a digest.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Hash {
    code: u8,
    digest: [u8; DIGEST_LEN],
}

impl Hash {
    /// Hashes `bytes` with SHA2-256 and tags the result as such.
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut out = [0u8; DIGEST_LEN];
        out.copy_from_slice(&digest);
        Hash {
            code: SHA2_256,
            digest: out,
        }
    }

    /// The well-known null hash, used as the fingerprint of a null message
    /// (e.g. the DNA anchor entry, which carries no message body).
    pub fn null() -> Self {
        Hash {
            code: NULL_CODE,
            digest: [0u8; DIGEST_LEN],
        }
    }

    /// True if this is the sentinel null hash.
    pub fn is_null(&self) -> bool {
        self.code == NULL_CODE && self.digest == [0u8; DIGEST_LEN]
    }

    /// Derives a [`Hash`] from a peer identifier's canonical byte encoding.
    pub fn from_peer_bytes(peer_bytes: &[u8]) -> Self {
        Self::of(peer_bytes)
    }

    /// Raw digest bytes (without the codec tag).
    pub fn digest(&self) -> &[u8; DIGEST_LEN] {
        &self.digest
    }

    /// The codec tag.
    pub fn code(&self) -> u8 {
        self.code
    }

    /// Multihash-style byte encoding: `[code, len, ...digest]`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + DIGEST_LEN);
        out.push(self.code);
        out.push(DIGEST_LEN as u8);
        out.extend_from_slice(&self.digest);
        out
    }

    /// Parses a multihash-style byte encoding produced by [`Hash::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HashError> {
        if bytes.len() != 2 + DIGEST_LEN || bytes[1] as usize != DIGEST_LEN {
            return Err(HashError::BadLength(bytes.len()));
        }
        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(&bytes[2..]);
        Ok(Hash {
            code: bytes[0],
            digest,
        })
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.to_bytes()).into_string())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self)
    }
}

impl FromStr for Hash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| HashError::Base58(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

/// Ordering is lexicographic on the raw encoded bytes (codec tag, then digest).
impl Ord for Hash {
    fn cmp(&self, other: &Self) -> Ordering {
        self.code
            .cmp(&other.code)
            .then_with(|| self.digest.cmp(&other.digest))
    }
}

impl PartialOrd for Hash {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Returns the XOR distance between two hashes' digests as an unsigned
/// big integer. Codec tags do not participate in the metric.
pub fn xor_distance(a: &Hash, b: &Hash) -> BigUint {
    let mut xored = [0u8; DIGEST_LEN];
    for i in 0..DIGEST_LEN {
        xored[i] = a.digest[i] ^ b.digest[i];
    }
    BigUint::from_bytes_be(&xored)
}

/// Returns `xs` sorted by ascending XOR distance to `target`, with ties
/// broken by lexicographic order on the hash's own bytes. The sort is
/// stable.
pub fn sort_by_distance(target: &Hash, xs: &[Hash]) -> Vec<Hash> {
    let mut out: Vec<Hash> = xs.to_vec();
    out.sort_by(|a, b| {
        let da = xor_distance(target, a);
        let db = xor_distance(target, b);
        da.cmp(&db).then_with(|| a.cmp(b))
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn of_is_deterministic() {
        let a = Hash::of(b"foo");
        let b = Hash::of(b"foo");
        assert_eq!(a, b);
        assert_ne!(a, Hash::of(b"bar"));
    }

    #[test]
    fn null_hash_is_distinct_from_any_sha256_hash() {
        let null = Hash::null();
        assert!(null.is_null());
        assert_ne!(null, Hash::of(b""));
    }

    #[test]
    fn string_round_trip() {
        let h = Hash::of(b"round trip me");
        let s = h.to_string();
        let parsed: Hash = s.parse().unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn byte_round_trip() {
        let h = Hash::of(b"byte round trip");
        let bytes = h.to_bytes();
        assert_eq!(Hash::from_bytes(&bytes).unwrap(), h);
    }

    #[test]
    fn xor_distance_to_self_is_zero() {
        let h = Hash::of(b"anything");
        assert_eq!(xor_distance(&h, &h), BigUint::from(0u32));
    }

    #[test]
    fn xor_distance_is_symmetric() {
        let a = Hash::of(b"alice");
        let b = Hash::of(b"bob");
        assert_eq!(xor_distance(&a, &b), xor_distance(&b, &a));
    }

    #[test]
    fn sort_by_distance_agrees_with_xor_distance() {
        let target = Hash::of(b"target");
        let xs: Vec<Hash> = (0..20).map(|i| Hash::of(format!("peer-{i}").as_bytes())).collect();
        let sorted = sort_by_distance(&target, &xs);
        assert_eq!(sorted.len(), xs.len());
        for window in sorted.windows(2) {
            let d0 = xor_distance(&target, &window[0]);
            let d1 = xor_distance(&target, &window[1]);
            assert!(d0 <= d1);
        }
    }

    #[test]
    fn sort_by_distance_is_a_total_order_with_tie_break() {
        let target = Hash::of(b"target");
        let h = Hash::of(b"same-distance-candidate");
        let xs = vec![h, h];
        let sorted = sort_by_distance(&target, &xs);
        assert_eq!(sorted, vec![h, h]);
    }

    #[test]
    fn ordering_is_lexicographic_on_encoded_bytes() {
        let a = Hash::of(b"a");
        let b = Hash::of(b"b");
        let ord = a.cmp(&b);
        assert_eq!(ord, a.to_bytes().cmp(&b.to_bytes()));
    }
}
