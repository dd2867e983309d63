//! LMDB-backed change log store.
//!
//! The logical schema (`_idx`, `idx:<N>`, `f:<fingerprint>`, `peer:<peerID>`,
//! `list:<listType>:<peerID>`) is realized as separate named LMDB
//! sub-databases rather than string-prefixed keys in one namespace — the
//! same idiom the reference ledger store uses for its `blocks`/`meta`/
//! `utxos`/`address_index` databases. A prefix in the logical schema
//! becomes a database; the suffix becomes the key.

use std::fs;
use std::path::Path;

use hc_hash::Hash;
use hc_node::{Message, PeerId};
use lmdb::{Cursor, Database, Environment, EnvironmentFlags, Transaction, WriteFlags};
use tracing::debug;

use crate::error::{Result, StoreError};

const META_IDX: &[u8; 4] = b"_idx";

/// A single absorbed change-log entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub idx: u64,
    pub message: Option<Message>,
}

/// A peer-list record: an identity plus the warrant for its membership.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerRecord {
    pub peer: PeerId,
    pub warrant: String,
}

/// The append-only, gap-free change log, plus the fingerprint and
/// peer-watermark secondary indices gossip relies on.
pub struct ChangeLogStore {
    env: Environment,
    meta_db: Database,
    log_db: Database,
    fingerprint_db: Database,
    peer_idx_db: Database,
    list_db: Database,
}

impl ChangeLogStore {
    /// Opens or creates a store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        fs::create_dir_all(path)?;

        let env = Environment::new()
            .set_flags(EnvironmentFlags::NO_SUB_DIR)
            .set_max_dbs(5)
            .set_map_size(1024 * 1024 * 1024)
            .open(path.join("store.mdb").as_ref())?;

        let meta_db = env.create_db(Some("meta"), lmdb::DatabaseFlags::empty())?;
        let log_db = env.create_db(Some("log"), lmdb::DatabaseFlags::empty())?;
        let fingerprint_db = env.create_db(Some("fingerprint"), lmdb::DatabaseFlags::empty())?;
        let peer_idx_db = env.create_db(Some("peer_idx"), lmdb::DatabaseFlags::empty())?;
        let list_db = env.create_db(Some("list"), lmdb::DatabaseFlags::empty())?;

        Ok(ChangeLogStore {
            env,
            meta_db,
            log_db,
            fingerprint_db,
            peer_idx_db,
            list_db,
        })
    }

    /// Appends `message` to the log, atomically assigning it the next
    /// index. Passing `None` appends a null entry (used only for the DNA
    /// anchor) with no fingerprint mapping.
    pub fn append(&self, message: Option<Message>) -> Result<u64> {
        let mut txn = self.env.begin_rw_txn()?;

        let current = read_idx(&txn, self.meta_db)?;
        let next = current + 1;

        let encoded = bincode::serialize(&message)?;
        txn.put(self.log_db, &next.to_be_bytes(), &encoded, WriteFlags::empty())?;
        txn.put(self.meta_db, META_IDX, &next.to_le_bytes(), WriteFlags::empty())?;

        if let Some(m) = &message {
            let fp = hc_node::fingerprint(Some(m));
            txn.put(
                self.fingerprint_db,
                &fp.to_bytes(),
                &next.to_le_bytes(),
                WriteFlags::empty(),
            )?;
        }

        txn.commit()?;
        debug!(idx = next, "appended change log entry");
        Ok(next)
    }

    /// Returns the message stored at `idx`.
    pub fn get_message(&self, idx: u64) -> Result<Option<Message>> {
        let txn = self.env.begin_ro_txn()?;
        match txn.get(self.log_db, &idx.to_be_bytes()) {
            Ok(bytes) => Ok(bincode::deserialize(bytes)?),
            Err(lmdb::Error::NotFound) => Err(StoreError::NoSuchIndex(idx)),
            Err(e) => Err(e.into()),
        }
    }

    /// The current maximum index; `0` before any append.
    pub fn current_idx(&self) -> Result<u64> {
        let txn = self.env.begin_ro_txn()?;
        read_idx(&txn, self.meta_db)
    }

    /// True if `fp` has been absorbed into the log.
    pub fn have_fingerprint(&self, fp: &Hash) -> Result<bool> {
        Ok(self.get_fingerprint(fp)?.is_some())
    }

    /// The index a fingerprint maps to, if absorbed.
    pub fn get_fingerprint(&self, fp: &Hash) -> Result<Option<u64>> {
        let txn = self.env.begin_ro_txn()?;
        match txn.get(self.fingerprint_db, &fp.to_bytes()) {
            Ok(bytes) => Ok(Some(u64::from_le_bytes(bytes.try_into().map_err(|_| {
                StoreError::Database(lmdb::Error::Corrupted)
            })?))),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Every entry with `idx >= since`, ascending.
    pub fn puts_since(&self, since: u64) -> Result<Vec<Entry>> {
        let txn = self.env.begin_ro_txn()?;
        let mut cursor = txn.open_ro_cursor(self.log_db)?;
        let mut out = Vec::new();
        for item in cursor.iter_from(since.to_be_bytes()) {
            let (key, value) = item?;
            let idx = u64::from_be_bytes(key.try_into().map_err(|_| StoreError::Database(lmdb::Error::Corrupted))?);
            let message: Option<Message> = bincode::deserialize(value)?;
            out.push(Entry { idx, message });
        }
        out.sort_by_key(|e| e.idx);
        Ok(out)
    }

    /// The last index of `peer`'s log this node has absorbed; `0` if
    /// unknown.
    pub fn peer_last_idx(&self, peer: &PeerId) -> Result<u64> {
        let txn = self.env.begin_ro_txn()?;
        match txn.get(self.peer_idx_db, &peer.inner().to_bytes()) {
            Ok(bytes) => Ok(u64::from_le_bytes(bytes.try_into().map_err(|_| {
                StoreError::Database(lmdb::Error::Corrupted)
            })?)),
            Err(lmdb::Error::NotFound) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Advances the watermark for `peer` to `new`, but only if `new` is
    /// strictly greater than the currently stored value. Callers are
    /// responsible for never invoking this for the local peer or a
    /// blocklisted peer.
    pub fn update_peer_idx(&self, peer: &PeerId, new: u64) -> Result<()> {
        let mut txn = self.env.begin_rw_txn()?;
        let key = peer.inner().to_bytes();
        let current = match txn.get(self.peer_idx_db, &key) {
            Ok(bytes) => u64::from_le_bytes(bytes.try_into().map_err(|_| {
                StoreError::Database(lmdb::Error::Corrupted)
            })?),
            Err(lmdb::Error::NotFound) => 0,
            Err(e) => return Err(e.into()),
        };
        if new > current {
            txn.put(self.peer_idx_db, &key, &new.to_le_bytes(), WriteFlags::empty())?;
            txn.commit()?;
        } else {
            txn.abort();
        }
        Ok(())
    }

    /// Creates a `peer:<id>` watermark record at index `0` the first time a
    /// peer is seen, so it is visible to `known_peers()` (and thus eligible
    /// for ticker-initiated gossip) even before we have absorbed anything
    /// from it. A no-op if a record already exists, so it never clobbers a
    /// watermark `update_peer_idx` has since advanced.
    pub fn add_gossiper(&self, peer: &PeerId) -> Result<()> {
        let mut txn = self.env.begin_rw_txn()?;
        let key = peer.inner().to_bytes();
        match txn.get(self.peer_idx_db, &key) {
            Ok(_) => {
                txn.abort();
                Ok(())
            }
            Err(lmdb::Error::NotFound) => {
                txn.put(self.peer_idx_db, &key, &0u64.to_le_bytes(), WriteFlags::empty())?;
                txn.commit()?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Every peer this node has a watermark for, i.e. every `peer:*` record
    /// in the logical schema. Used by the gossip engine to build its
    /// neighborhood.
    pub fn known_peers(&self) -> Result<Vec<PeerId>> {
        let txn = self.env.begin_ro_txn()?;
        let mut cursor = txn.open_ro_cursor(self.peer_idx_db)?;
        let mut out = Vec::new();
        for item in cursor.iter_start() {
            let (key, _value) = item?;
            let peer = libp2p::PeerId::from_bytes(key)
                .map_err(|_| StoreError::Database(lmdb::Error::Corrupted))?;
            out.push(PeerId::new(peer));
        }
        Ok(out)
    }

    /// Forgets everything we have absorbed about `peer`.
    pub fn delete_peer(&self, peer: &PeerId) -> Result<()> {
        let mut txn = self.env.begin_rw_txn()?;
        match txn.del(self.peer_idx_db, &peer.inner().to_bytes(), None) {
            Ok(()) | Err(lmdb::Error::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
        txn.commit()?;
        Ok(())
    }

    /// All records on `list_type`.
    pub fn get_list(&self, list_type: &str) -> Result<Vec<PeerRecord>> {
        let txn = self.env.begin_ro_txn()?;
        let mut cursor = txn.open_ro_cursor(self.list_db)?;
        let mut out = Vec::new();
        for item in cursor.iter_start() {
            let (key, value) = item?;
            if let Some((kind, peer_bytes)) = split_list_key(key) {
                if kind == list_type {
                    let peer = PeerId::new(libp2p::PeerId::from_bytes(peer_bytes).map_err(|_| {
                        StoreError::Database(lmdb::Error::Corrupted)
                    })?);
                    let warrant = String::from_utf8_lossy(value).into_owned();
                    out.push(PeerRecord { peer, warrant });
                }
            }
        }
        Ok(out)
    }

    /// Adds `records` to `list_type`, appending `witnessing_message` to the
    /// log in the same transaction so that list additions themselves
    /// replicate by gossip.
    pub fn add_to_list(
        &self,
        list_type: &str,
        records: &[PeerRecord],
        witnessing_message: Message,
    ) -> Result<u64> {
        let mut txn = self.env.begin_rw_txn()?;

        let current = read_idx(&txn, self.meta_db)?;
        let next = current + 1;
        let encoded = bincode::serialize(&Some(witnessing_message.clone()))?;
        txn.put(self.log_db, &next.to_be_bytes(), &encoded, WriteFlags::empty())?;
        txn.put(self.meta_db, META_IDX, &next.to_le_bytes(), WriteFlags::empty())?;
        let fp = hc_node::fingerprint(Some(&witnessing_message));
        txn.put(
            self.fingerprint_db,
            &fp.to_bytes(),
            &next.to_le_bytes(),
            WriteFlags::empty(),
        )?;

        for record in records {
            let key = make_list_key(list_type, &record.peer.inner().to_bytes());
            txn.put(self.list_db, &key, record.warrant.as_bytes(), WriteFlags::empty())?;
        }

        txn.commit()?;
        Ok(next)
    }
}

fn read_idx<T: Transaction>(txn: &T, meta_db: Database) -> Result<u64> {
    match txn.get(meta_db, &META_IDX) {
        Ok(bytes) => Ok(u64::from_le_bytes(bytes.try_into().map_err(|_| {
            StoreError::Database(lmdb::Error::Corrupted)
        })?)),
        Err(lmdb::Error::NotFound) => Ok(0),
        Err(e) => Err(e.into()),
    }
}

fn make_list_key(list_type: &str, peer_bytes: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + list_type.len() + peer_bytes.len());
    key.push(list_type.len() as u8);
    key.extend_from_slice(list_type.as_bytes());
    key.extend_from_slice(peer_bytes);
    key
}

fn split_list_key(key: &[u8]) -> Option<(&str, &[u8])> {
    let len = *key.first()? as usize;
    let kind = std::str::from_utf8(key.get(1..1 + len)?).ok()?;
    let peer_bytes = key.get(1 + len..)?;
    Some((kind, peer_bytes))
}
