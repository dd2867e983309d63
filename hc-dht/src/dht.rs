//! The facade itself: a constructed handle wiring the change log store,
//! routing table, node, entry store, and gossip engine together behind one
//! set of operations.
//!
//! Re-architected per the Design Note this core carries forward from the
//! reference implementation's global singleton: there is no process-global
//! DHT here. [`DhtBuilder::build`] wires exactly one instance, and every
//! operation is a method on the handle it returns.

use std::sync::{Arc, RwLock};

use hc_gossip::GossipEngine;
use hc_hash::Hash;
use hc_node::{Body, Message, MsgType, Node, PeerId, ProtocolTag};
use hc_routing::RoutingTable;
use hc_store::{ChangeLogStore, PeerRecord as StorePeerRecord};
use libp2p::Multiaddr;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::DhtConfig;
use crate::entry::{EntryRecord, EntryStore, GET_MASK_DEFAULT};
use crate::error::{DhtError, DhtResult};
use crate::handlers::{ActionHandler, GossipHandler, KademliaHandler, ValidateHandler, BLOCKED_LIST};
use crate::swarm::{SwarmDriver, SwarmHandle};
use crate::validator::{AcceptAllValidator, Validator};

/// Builds a single [`Dht`] instance. Takes ownership of a [`DhtConfig`] and
/// an optional embedder-supplied [`Validator`] (defaulting to
/// [`AcceptAllValidator`] so the facade is exercisable standalone).
pub struct DhtBuilder {
    config: DhtConfig,
    validator: Arc<dyn Validator>,
}

impl DhtBuilder {
    pub fn new(config: DhtConfig) -> Self {
        DhtBuilder {
            config,
            validator: Arc::new(AcceptAllValidator),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    /// Wires the store, routing table, node, and gossip engine into one
    /// instance, spawns its background tasks, and loads the persisted
    /// blocklist (§4.4: "the blocklist is initialized from the persisted
    /// peer-list table at startup").
    pub async fn build(self) -> DhtResult<Dht> {
        let store = Arc::new(ChangeLogStore::open(&self.config.store_path)?);
        let entries = Arc::new(EntryStore::new());

        let (mut swarm_driver, swarm_handle) = SwarmDriver::new(&self.config.mux_id)?;
        let local = PeerId::new(swarm_driver.local_peer_id());
        let routing = Arc::new(RwLock::new(RoutingTable::<PeerId>::new(
            local.to_hash(),
            self.config.gossip.routing_table_k as usize,
        )));

        let gossip_transport: Arc<dyn hc_gossip::GossipTransport> = Arc::new(swarm_handle.clone());

        // `Node` and its `ActionHandler`/`GossipHandler` form a reference
        // cycle in the reference implementation (the node's handler table
        // holds the handlers, and the action handler needs to call back
        // into the node to update the blocklist). Here that back-reference
        // is a `Weak<Node>`, resolved via `Arc::new_cyclic` so the cycle
        // never creates a strong-reference leak.
        let mut gossip_engine: Option<Arc<GossipEngine>> = None;
        let node = Arc::new_cyclic(|weak_node| {
            let mut node = Node::new(self.config.mux_id.clone());

            let action = ActionHandler::new(
                local,
                weak_node.clone(),
                store.clone(),
                entries.clone(),
                self.validator.clone(),
                routing.clone(),
            );
            let action = Arc::new(action);
            node.register_handler(ProtocolTag::Action, action.clone());

            let validate = ValidateHandler::new(local, self.validator.clone());
            node.register_handler(ProtocolTag::Validate, Arc::new(validate));

            let kademlia = KademliaHandler::new(
                local,
                routing.clone(),
                self.config.gossip.routing_table_k as usize,
            );
            node.register_handler(ProtocolTag::Kademlia, Arc::new(kademlia));

            let action_dispatcher: Arc<dyn hc_gossip::ActionDispatcher> = action.clone();
            let engine = GossipEngine::new(
                local,
                store.clone(),
                gossip_transport.clone(),
                action_dispatcher,
                self.config.gossip.clone(),
            );
            node.register_handler(ProtocolTag::Gossip, Arc::new(GossipHandler::new(local, engine.clone())));
            gossip_engine = Some(engine);

            node
        });
        let gossip_engine = gossip_engine.expect("set inside the Arc::new_cyclic closure above");

        swarm_driver.attach_node(node.clone());
        for peer in store.get_list(BLOCKED_LIST)? {
            node.block(peer.peer);
            // I4 (§3): a restart must not let a stale routing/watermark
            // entry re-admit an already-blocked peer into the gossip
            // neighborhood before its next `list-add` witness is absorbed.
            routing.write().unwrap().remove(&peer.peer);
            store.delete_peer(&peer.peer)?;
            info!(peer = %peer.peer, "restored blocklist entry from the persisted peer-list table");
        }

        if let Some(addr) = self.config.listen_addr.clone() {
            swarm_driver.listen_on(addr)?;
        }

        let swarm_task = tokio::spawn(swarm_driver.run());
        let ticker_task = tokio::spawn(gossip_engine.clone().run_ticker());
        let dispatcher_task = tokio::spawn(gossip_engine.clone().run_dispatcher());

        let dht = Dht {
            local,
            config: self.config.clone(),
            store,
            entries,
            routing,
            node,
            gossip: gossip_engine,
            swarm: swarm_handle,
            background: vec![swarm_task, ticker_task, dispatcher_task],
        };

        for addr in dht.config.bootstrap_peers.clone() {
            if let Err(err) = dht.swarm.dial(addr.clone()).await {
                warn!(%addr, error = %err, "failed to dial bootstrap peer");
            }
        }

        Ok(dht)
    }
}

/// A constructed DHT instance. Every operation on this type is the facade's
/// equivalent of a reference-implementation API call, scoped to exactly the
/// store, node, and gossip engine this builder wired together.
pub struct Dht {
    local: PeerId,
    config: DhtConfig,
    store: Arc<ChangeLogStore>,
    entries: Arc<EntryStore>,
    routing: Arc<RwLock<RoutingTable<PeerId>>>,
    node: Arc<Node>,
    gossip: Arc<GossipEngine>,
    swarm: SwarmHandle,
    background: Vec<JoinHandle<()>>,
}

impl Dht {
    pub fn local_peer(&self) -> PeerId {
        self.local
    }

    pub fn mux_id(&self) -> &str {
        &self.config.mux_id
    }

    /// Stores `data` under its content hash and witnesses the put both
    /// locally and to `to` (typically a closer peer found via
    /// [`Dht::find_node`]); returns the content hash.
    pub async fn put(&self, entry_type: impl Into<String>, data: Vec<u8>, to: PeerId) -> DhtResult<Hash> {
        let hash = Hash::of(&data);
        self.entries.put(hash, entry_type.into(), data, self.local);

        let message = Message::new(MsgType::Put, self.local, Some(Body::PutReq { hash }));
        self.store.append(Some(message.clone()))?;
        self.send(to, ProtocolTag::Action, message).await?;
        Ok(hash)
    }

    /// Reads the entry at `hash` from the local content index. Follows a
    /// `Modified` redirect at most once, matching the reference
    /// implementation's non-recursive get semantics.
    pub fn get(&self, hash: Hash) -> DhtResult<EntryRecord> {
        self.get_with_mask(hash, GET_MASK_DEFAULT)
    }

    pub fn get_with_mask(&self, hash: Hash, _get_mask: u32) -> DhtResult<EntryRecord> {
        match self.entries.get(&hash) {
            None => Err(DhtError::HashNotFound),
            Some(record) => match &record.status {
                crate::entry::EntryStatus::Deleted => Err(DhtError::HashDeleted),
                crate::entry::EntryStatus::Modified(replacement) => match self.entries.get(replacement) {
                    Some(next) => Ok(next),
                    None => Err(DhtError::HashModified(*replacement)),
                },
                crate::entry::EntryStatus::Live => Ok(record),
            },
        }
    }

    pub async fn delete(&self, hash: Hash, to: PeerId) -> DhtResult<()> {
        let message = Message::new(MsgType::Delete, self.local, Some(Body::DelReq { hash }));
        self.send(to, ProtocolTag::Action, message).await?;
        Ok(())
    }

    pub async fn modify(&self, hash: Hash, replacement: Hash, to: PeerId) -> DhtResult<()> {
        let message = Message::new(MsgType::Modify, self.local, Some(Body::ModReq { hash, replacement }));
        self.send(to, ProtocolTag::Action, message).await?;
        Ok(())
    }

    pub async fn link(&self, base: Hash, link: Hash, tag: impl Into<String>, to: PeerId) -> DhtResult<()> {
        let message = Message::new(
            MsgType::Link,
            self.local,
            Some(Body::LinkReq { base, link, tag: tag.into() }),
        );
        self.send(to, ProtocolTag::Action, message).await?;
        Ok(())
    }

    pub async fn delete_link(&self, base: Hash, link: Hash, tag: impl Into<String>, to: PeerId) -> DhtResult<()> {
        let message = Message::new(
            MsgType::DeleteLink,
            self.local,
            Some(Body::DeleteLinkReq { base, link, tag: tag.into() }),
        );
        self.send(to, ProtocolTag::Action, message).await?;
        Ok(())
    }

    pub fn get_link(&self, base: Hash, tag: &str) -> Vec<Hash> {
        self.entries.get_links(&base, tag)
    }

    /// Looks up the `k` nearest known peers to `target` by asking `via`'s
    /// Kademlia handler, falling back to the local routing table if `via`
    /// is unreachable.
    pub async fn find_node(&self, target: Hash, via: PeerId) -> DhtResult<Vec<PeerId>> {
        let message = Message::new(MsgType::FindNode, self.local, Some(Body::FindNodeReq { target }));
        match self.send(via, ProtocolTag::Kademlia, message).await {
            Ok(reply) => match reply.body {
                Some(Body::FindNodeResp { peers }) => Ok(peers.into_iter().map(|d| d.peer).collect()),
                _ => Ok(self.local_nearest(target)),
            },
            Err(_) => Ok(self.local_nearest(target)),
        }
    }

    fn local_nearest(&self, target: Hash) -> Vec<PeerId> {
        let k = self.config.gossip.routing_table_k as usize;
        self.routing.read().unwrap().nearest(&target, k)
    }

    /// Records a new peer in the routing table and, on first discovery,
    /// creates its `peer:<id>` watermark at index 0 so it is visible to the
    /// gossip ticker's neighborhood before anything has been absorbed from
    /// it (§3 Lifecycle; mirrors the reference's `AddGossiper`). Call this
    /// whenever a peer is discovered — via `find_node`, an inbound
    /// connection, or a dial.
    ///
    /// A no-op for a blocklisted peer (I4, §3): the routing table and the
    /// watermark table are both part of the peerstore, and a blocked peer
    /// is never added to either.
    pub fn note_peer(&self, peer: PeerId) {
        if self.node.is_blocked(&peer) {
            return;
        }
        let hash = peer.to_hash();
        self.routing.write().unwrap().update(peer, hash);
        if let Err(err) = self.store.add_gossiper(&peer) {
            warn!(%peer, error = %err, "failed to record gossiper watermark for a newly discovered peer");
        }
    }

    /// Blocks `peer` in this node's in-memory blocklist only, with no
    /// persistence or gossip replication. Most callers want
    /// [`Dht::add_to_list`] with [`BLOCKED_LIST`](crate::handlers::BLOCKED_LIST)
    /// instead, which durably witnesses the block so it survives a restart
    /// and propagates to the rest of the neighborhood (§4.6).
    pub fn block(&self, peer: PeerId) {
        self.node.block(peer);
    }

    /// Unblocks `peer` locally. Note this is the in-memory mirror only: the
    /// persisted peer-list table has no "remove" operation in this core
    /// (§4.2 lists `add_to_list`, not a remove), so a restart will restore
    /// the block from the persisted table unless it is re-added with a
    /// different list.
    pub fn unblock(&self, peer: PeerId) {
        self.node.unblock(&peer);
    }

    pub fn is_blocked(&self, peer: &PeerId) -> bool {
        self.node.is_blocked(peer)
    }

    /// Adds `records` to `list_type` and, if that list is the blocklist,
    /// blocks every listed peer; witnesses the addition in the change log
    /// so it propagates by gossip like any other mutation.
    pub fn add_to_list(&self, list_type: &str, records: Vec<(PeerId, String)>) -> DhtResult<()> {
        let store_records: Vec<StorePeerRecord> = records
            .iter()
            .map(|(peer, warrant)| StorePeerRecord {
                peer: *peer,
                warrant: warrant.clone(),
            })
            .collect();
        let witness = Message::new(
            MsgType::ListAdd,
            self.local,
            Some(Body::ListAddReq {
                list_type: list_type.to_string(),
                records: store_records
                    .iter()
                    .map(|r| hc_node::message::PeerRecord {
                        peer: r.peer,
                        warrant: r.warrant.clone(),
                    })
                    .collect(),
            }),
        );
        self.store.add_to_list(list_type, &store_records, witness)?;
        if list_type == BLOCKED_LIST {
            for (peer, _) in &records {
                self.node.block(*peer);
                // I4 (§3): never leave a blocked peer reachable through the
                // routing table or eligible for gossip via a stale
                // watermark.
                self.routing.write().unwrap().remove(peer);
                self.store.delete_peer(peer)?;
            }
        }
        Ok(())
    }

    /// Dials a known multiaddr and waits for the connection attempt to be
    /// submitted to the swarm (not for the handshake to complete).
    pub async fn dial(&self, addr: Multiaddr) -> DhtResult<()> {
        self.swarm.dial(addr).await
    }

    /// Requests one gossip exchange with `target` outside of the ticker's
    /// normal cadence, e.g. right after `note_peer` discovers someone new.
    pub async fn gossip_now(&self, target: PeerId) -> DhtResult<()> {
        self.gossip
            .handle()
            .gossip_with(target)
            .await
            .map_err(DhtError::from)
    }

    async fn send(&self, to: PeerId, protocol: ProtocolTag, message: Message) -> DhtResult<Message> {
        if self.node.is_blocked(&to) {
            return Err(DhtError::Protocol(hc_node::Error::Blocklisted));
        }
        self.swarm.send(protocol, to, message).await
    }

    /// Tears down the background tasks. Dropping the [`Dht`] without
    /// calling this leaves them running until the swarm handle's sender
    /// side is dropped, at which point the driver's command channel closes
    /// and it exits on its own.
    pub async fn shutdown(mut self) {
        self.swarm.shutdown().await;
        for task in self.background.drain(..) {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Builds a standalone `Dht` with no listener and no bootstrap peers —
    /// every operation in these tests addresses the node's own `to`/`via`
    /// parameter with `dht.local_peer()`, which the send contract's step 2
    /// (§4.4) short-circuits in-process, so no real transport is exercised.
    async fn build_dht(mux: &str) -> Dht {
        let dir = tempdir().unwrap();
        let config = DhtConfig::new(mux, dir.path().to_path_buf()).with_gossip(hc_gossip::GossipConfig {
            gossip_interval_ms: 0,
            ..hc_gossip::GossipConfig::default()
        });
        DhtBuilder::new(config).build().await.unwrap()
    }

    #[tokio::test]
    async fn self_addressed_put_and_get_round_trip() {
        let dht = build_dht("test-put-get").await;
        let me = dht.local_peer();

        let hash = dht.put("post", b"hello".to_vec(), me).await.unwrap();
        let record = dht.get(hash).unwrap();
        assert_eq!(record.data, b"hello");

        dht.shutdown().await;
    }

    /// Scenario 5 (§8): a `get` for a hash that has been modified returns
    /// `DhtError::HashModified` with the replacement hash while the
    /// replacement is still unknown locally; once the replacement becomes
    /// known, `get` on the original hash follows the redirect and returns
    /// the replacement's content.
    #[tokio::test]
    async fn modify_redirect_resolves_once_the_replacement_is_known_locally() {
        let dht = build_dht("test-modify").await;
        let me = dht.local_peer();

        let original = dht.put("post", b"original".to_vec(), me).await.unwrap();
        let replacement_data = b"replacement".to_vec();
        let replacement_hash = Hash::of(&replacement_data);

        dht.modify(original, replacement_hash, me).await.unwrap();

        match dht.get(original).unwrap_err() {
            DhtError::HashModified(h) => assert_eq!(h, replacement_hash),
            other => panic!("expected HashModified, got {other:?}"),
        }

        let put_hash = dht.put("post", replacement_data.clone(), me).await.unwrap();
        assert_eq!(put_hash, replacement_hash);

        let record = dht.get(original).unwrap();
        assert_eq!(record.data, replacement_data);

        dht.shutdown().await;
    }

    /// Scenario 6 (§8): `add_to_list` blocks the listed peer immediately
    /// (no waiting on gossip to loop the witness back) and appends the
    /// `ListAdd` witness message to the change log so a later
    /// `puts_since` call — and thus gossip to the rest of the neighborhood
    /// — includes it.
    #[tokio::test]
    async fn add_to_list_blocks_immediately_and_witnesses_the_change_log() {
        let dht = build_dht("test-list").await;
        let target = PeerId::new(libp2p::PeerId::random());
        let before = dht.store.current_idx().unwrap();

        dht.add_to_list(crate::handlers::BLOCKED_LIST, vec![(target, "spam".into())])
            .unwrap();

        assert!(dht.is_blocked(&target));
        assert_eq!(dht.store.current_idx().unwrap(), before + 1);

        let entries = dht.store.puts_since(before + 1).unwrap();
        assert_eq!(entries.len(), 1);
        match entries[0].message.as_ref().map(|m| m.msg_type) {
            Some(MsgType::ListAdd) => {}
            other => panic!("expected the witness message to be a list-add, got {other:?}"),
        }

        dht.shutdown().await;
    }

    /// I4 (§3): blocking a peer that was already known to the routing
    /// table and had an absorbed watermark purges both, so `find_node`
    /// never returns it and it drops out of future gossip neighborhoods.
    #[tokio::test]
    async fn add_to_list_purges_an_already_known_peer_from_routing_and_watermark_state() {
        let dht = build_dht("test-list-purge").await;
        let target = PeerId::new(libp2p::PeerId::random());

        dht.note_peer(target);
        dht.store.update_peer_idx(&target, 4).unwrap();
        assert!(dht.local_nearest(target.to_hash()).contains(&target));

        dht.add_to_list(crate::handlers::BLOCKED_LIST, vec![(target, "spam".into())])
            .unwrap();

        assert!(dht.is_blocked(&target));
        assert!(!dht.local_nearest(target.to_hash()).contains(&target));
        assert_eq!(dht.store.peer_last_idx(&target).unwrap(), 0);

        dht.shutdown().await;
    }

    /// I4 (§3): a blocklisted peer is never added to the peerstore, so
    /// `note_peer` must refuse to re-admit one even when called directly
    /// (e.g. from a stale discovery event racing a block).
    #[tokio::test]
    async fn note_peer_is_a_no_op_for_an_already_blocked_peer() {
        let dht = build_dht("test-note-peer-blocked").await;
        let target = PeerId::new(libp2p::PeerId::random());

        dht.add_to_list(crate::handlers::BLOCKED_LIST, vec![(target, "spam".into())])
            .unwrap();
        dht.note_peer(target);

        assert!(!dht.local_nearest(target.to_hash()).contains(&target));

        dht.shutdown().await;
    }

    #[tokio::test]
    async fn find_node_falls_back_to_the_local_routing_table_when_the_peer_is_unreachable() {
        let dht = build_dht("test-find-node").await;
        let unreachable = PeerId::new(libp2p::PeerId::random());
        let nearby = PeerId::new(libp2p::PeerId::random());
        dht.note_peer(nearby);

        let target = Hash::of(b"some target");
        let found = dht.find_node(target, unreachable).await.unwrap();
        assert!(found.contains(&nearby));

        dht.shutdown().await;
    }
}
