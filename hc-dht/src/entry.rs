//! The content-addressed entry store and link index.
//!
//! On-disk serialization of entry payloads is explicitly out of scope for
//! this core (the application-scripting runtime owns that format), so
//! entries are held here as opaque bytes behind an in-memory index. This
//! mirrors the change log store's separation of concerns: the log records
//! *that* a mutation happened for gossip purposes, while this index
//! answers `get`/`get_link` queries about current DHT content.

use std::collections::HashMap;
use std::sync::RwLock;

use hc_hash::Hash;
use hc_node::PeerId;

/// The lifecycle state of a stored entry.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryStatus {
    Live,
    Deleted,
    /// Carries the hash of the entry that replaced this one; `get` follows
    /// this redirect at most once per call.
    Modified(Hash),
}

/// A single stored entry: its opaque payload, type tag, status, and the
/// peers who have been recorded as sources for it.
#[derive(Debug)]
pub struct EntryRecord {
    pub entry_type: String,
    pub data: Vec<u8>,
    pub status: EntryStatus,
    pub sources: Vec<PeerId>,
}

/// Bitmask constants for `GetReq::get_mask`, mirroring the reference
/// implementation's `GetMaskEntry` / `GetMaskEntryType` / `GetMaskSources`.
pub const GET_MASK_ENTRY: u32 = 0x1;
pub const GET_MASK_ENTRY_TYPE: u32 = 0x2;
pub const GET_MASK_SOURCES: u32 = 0x4;
pub const GET_MASK_DEFAULT: u32 = GET_MASK_ENTRY;

/// In-memory content-addressed entry store plus a `(base, tag) -> [link]`
/// index, guarded by a single lock each since mutation is infrequent
/// relative to lookups and neither index participates in the change log
/// store's transactional guarantees (I1-I3 bind the log, not DHT content).
#[derive(Default)]
pub struct EntryStore {
    entries: RwLock<HashMap<Hash, EntryRecord>>,
    links: RwLock<HashMap<(Hash, String), Vec<Hash>>>,
}

impl EntryStore {
    pub fn new() -> Self {
        EntryStore::default()
    }

    pub fn put(&self, hash: Hash, entry_type: String, data: Vec<u8>, source: PeerId) {
        let mut entries = self.entries.write().unwrap();
        entries.insert(
            hash,
            EntryRecord {
                entry_type,
                data,
                status: EntryStatus::Live,
                sources: vec![source],
            },
        );
    }

    pub fn get(&self, hash: &Hash) -> Option<EntryRecord> {
        self.entries.read().unwrap().get(hash).cloned()
    }

    pub fn mark_deleted(&self, hash: &Hash) -> bool {
        let mut entries = self.entries.write().unwrap();
        match entries.get_mut(hash) {
            Some(record) => {
                record.status = EntryStatus::Deleted;
                true
            }
            None => false,
        }
    }

    pub fn mark_modified(&self, hash: &Hash, replacement: Hash) -> bool {
        let mut entries = self.entries.write().unwrap();
        match entries.get_mut(hash) {
            Some(record) => {
                record.status = EntryStatus::Modified(replacement);
                true
            }
            None => false,
        }
    }

    pub fn add_link(&self, base: Hash, tag: String, link: Hash) {
        self.links.write().unwrap().entry((base, tag)).or_default().push(link);
    }

    pub fn remove_link(&self, base: &Hash, tag: &str, link: &Hash) -> bool {
        let mut links = self.links.write().unwrap();
        if let Some(list) = links.get_mut(&(*base, tag.to_string())) {
            let before = list.len();
            list.retain(|h| h != link);
            return list.len() != before;
        }
        false
    }

    pub fn get_links(&self, base: &Hash, tag: &str) -> Vec<Hash> {
        self.links
            .read()
            .unwrap()
            .get(&(*base, tag.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

impl Clone for EntryRecord {
    fn clone(&self) -> Self {
        EntryRecord {
            entry_type: self.entry_type.clone(),
            data: self.data.clone(),
            status: self.status.clone(),
            sources: self.sources.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libp2p::PeerId as Libp2pPeerId;

    fn peer() -> PeerId {
        PeerId::new(Libp2pPeerId::random())
    }

    #[test]
    fn put_then_get_round_trips() {
        let store = EntryStore::new();
        let hash = Hash::of(b"entry");
        store.put(hash, "post".into(), b"hello".to_vec(), peer());

        let record = store.get(&hash).unwrap();
        assert_eq!(record.status, EntryStatus::Live);
        assert_eq!(record.data, b"hello");
    }

    #[test]
    fn mark_modified_sets_replacement_hash() {
        let store = EntryStore::new();
        let hash = Hash::of(b"entry");
        let replacement = Hash::of(b"replacement");
        store.put(hash, "post".into(), b"hello".to_vec(), peer());
        assert!(store.mark_modified(&hash, replacement));

        let record = store.get(&hash).unwrap();
        assert_eq!(record.status, EntryStatus::Modified(replacement));
    }

    #[test]
    fn links_round_trip_and_can_be_removed() {
        let store = EntryStore::new();
        let base = Hash::of(b"base");
        let link = Hash::of(b"link");
        store.add_link(base, "comment".into(), link);
        assert_eq!(store.get_links(&base, "comment"), vec![link]);

        assert!(store.remove_link(&base, "comment", &link));
        assert!(store.get_links(&base, "comment").is_empty());
    }
}
