//! Kademlia-style k-bucket routing table.
//!
//! Peers are bucketed by the length of the common prefix they share with
//! the local node's hash (bucket 0 holds peers differing in the top bit,
//! bucket 255 holds peers differing only in the bottom bit). Each bucket
//! holds at most `k` peers, least-recently-seen first, following the
//! standard Kademlia eviction rule: a fresh peer replaces the
//! least-recently-seen one only if the bucket is full and the incoming
//! peer is newer.

use std::time::Instant;

use hc_hash::{sort_by_distance, xor_distance, Hash};

/// A single bucketed peer and the time it was last refreshed.
#[derive(Debug, Clone)]
struct Entry<P> {
    peer: P,
    hash: Hash,
    last_seen: Instant,
}

/// A Kademlia-style routing table over 256 prefix-length buckets.
pub struct RoutingTable<P> {
    local: Hash,
    k: usize,
    buckets: Vec<Vec<Entry<P>>>,
}

impl<P: Clone + PartialEq> RoutingTable<P> {
    /// Creates an empty table for a node whose hash is `local`, with
    /// bucket capacity `k`.
    pub fn new(local: Hash, k: usize) -> Self {
        RoutingTable {
            local,
            k,
            buckets: (0..=hc_hash::DIGEST_LEN * 8).map(|_| Vec::new()).collect(),
        }
    }

    /// The number of bits `local` and `hash` share as a common prefix,
    /// used as the bucket index. Two equal hashes share the maximum
    /// prefix length of the digest (one past the last bit index), so the
    /// bucket count is sized to `digest_bits + 1` rather than `digest_bits`.
    fn bucket_index(&self, hash: &Hash) -> usize {
        let a = self.local.digest();
        let b = hash.digest();
        let mut common_bits = 0;
        for (byte_a, byte_b) in a.iter().zip(b.iter()) {
            let diff = byte_a ^ byte_b;
            if diff == 0 {
                common_bits += 8;
                continue;
            }
            common_bits += diff.leading_zeros() as usize;
            break;
        }
        common_bits
    }

    /// Inserts or refreshes `peer` in its bucket. If the bucket is full,
    /// the incoming peer replaces the least-recently-seen entry only if it
    /// is itself fresher than that entry was when it was last seen;
    /// otherwise the insert is silently discarded.
    pub fn update(&mut self, peer: P, peer_hash: Hash) {
        let idx = self.bucket_index(&peer_hash);
        let bucket = &mut self.buckets[idx];
        let now = Instant::now();

        if let Some(pos) = bucket.iter().position(|e| e.peer == peer) {
            bucket.remove(pos);
            bucket.push(Entry {
                peer,
                hash: peer_hash,
                last_seen: now,
            });
            return;
        }

        if bucket.len() < self.k {
            bucket.push(Entry {
                peer,
                hash: peer_hash,
                last_seen: now,
            });
            return;
        }

        let lru_pos = bucket
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.last_seen)
            .map(|(i, _)| i)
            .expect("bucket at capacity is non-empty");
        if now > bucket[lru_pos].last_seen {
            bucket[lru_pos] = Entry {
                peer,
                hash: peer_hash,
                last_seen: now,
            };
        }
    }

    /// Removes `peer` from whichever bucket holds it, if any.
    pub fn remove(&mut self, peer: &P) {
        for bucket in &mut self.buckets {
            bucket.retain(|e| &e.peer != peer);
        }
    }

    /// Returns up to `n` peers nearest `target` by XOR distance, ascending,
    /// scanning every bucket since a single bucket's contents are not
    /// necessarily the globally closest peers to an arbitrary target.
    pub fn nearest(&self, target: &Hash, n: usize) -> Vec<P> {
        let mut all: Vec<(Hash, P)> = self
            .buckets
            .iter()
            .flat_map(|b| b.iter().map(|e| (e.hash, e.peer.clone())))
            .collect();
        let hashes: Vec<Hash> = all.iter().map(|(h, _)| *h).collect();
        let ordered = sort_by_distance(target, &hashes);

        let mut out = Vec::with_capacity(n.min(all.len()));
        for h in ordered {
            if out.len() == n {
                break;
            }
            if let Some(pos) = all.iter().position(|(hh, _)| hh == &h) {
                out.push(all.swap_remove(pos).1);
            }
        }
        out
    }

    /// Total number of peers known across all buckets.
    pub fn size(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    /// XOR distance from the local node's hash to `hash`.
    pub fn distance_from_local(&self, hash: &Hash) -> num_bigint::BigUint {
        xor_distance(&self.local, hash)
    }
}
