//! Protocol handlers: the per-sub-protocol logic a [`hc_node::Node`]
//! dispatches into once a message has cleared the receive contract
//! (non-blocked sender, admissible type for the protocol).
//!
//! Each handler here is deliberately small and synchronous — all of the
//! state it touches (the entry store, the routing table, the change log)
//! is itself synchronous, so there is no need to push async machinery
//! down into message handling. The one exception is [`GossipHandler`],
//! which bridges to [`hc_gossip::GossipEngine`]'s async interface.

use std::sync::{Arc, RwLock, Weak};

use hc_gossip::GossipEngine;
use hc_node::{Body, Error as NodeError, Handler, Message, MsgType, Node, PeerId, ProtocolTag, Result as NodeResult};
use hc_routing::RoutingTable;
use hc_store::{ChangeLogStore, PeerRecord as StorePeerRecord};
use tracing::info;

use crate::entry::{EntryStore, GET_MASK_ENTRY};
use crate::validator::{Validator, Verdict};

/// The name the reference implementation and this core both use for the
/// one typed peer list specified in §4.6: the blocklist.
pub const BLOCKED_LIST: &str = "blockedlist";

/// Applies mutating Action-protocol requests to DHT content and answers
/// read-only ones, from both a locally-initiated call and a gossip-absorbed
/// reception (see [`hc_gossip::ActionDispatcher`] below).
///
/// Holds a non-owning back-reference to the [`Node`] that registers it, so
/// that a `list-add` onto the blocklist can update the node's in-memory
/// blocklist map without creating the node/handler reference cycle the
/// reference implementation has around its singleton (see `DESIGN.md`).
pub struct ActionHandler {
    local: PeerId,
    node: Weak<Node>,
    store: Arc<ChangeLogStore>,
    entries: Arc<EntryStore>,
    validator: Arc<dyn Validator>,
    routing: Arc<RwLock<RoutingTable<PeerId>>>,
}

impl ActionHandler {
    pub fn new(
        local: PeerId,
        node: Weak<Node>,
        store: Arc<ChangeLogStore>,
        entries: Arc<EntryStore>,
        validator: Arc<dyn Validator>,
        routing: Arc<RwLock<RoutingTable<PeerId>>>,
    ) -> Self {
        ActionHandler {
            local,
            node,
            store,
            entries,
            validator,
            routing,
        }
    }

    /// Purges `peer` from every piece of state that would otherwise let it
    /// keep participating: the routing table (so `find_node` never returns
    /// it) and the peer-watermark table (so it drops out of
    /// `known_peers()` and thus out of future gossip neighborhoods). §4.2's
    /// I4 requires a blocklisted peer is "never added to the peerstore,
    /// never gossiped with" — blocking only the send/receive path is not
    /// enough if a stale watermark or routing entry survives the block.
    fn purge_blocked_peer(&self, peer: &PeerId) {
        self.routing.write().unwrap().remove(peer);
        if let Err(err) = self.store.delete_peer(peer) {
            tracing::warn!(%peer, error = %err, "failed to purge watermark for a newly blocked peer");
        }
    }

    fn ok(&self) -> Message {
        Message::new(MsgType::OkResponse, self.local, None)
    }

    /// Applies one mutating message's effect and witnesses it in the
    /// change log. Shared by the in-process handler path and gossip
    /// absorption, which is exactly what makes absorbed puts indistinguishable
    /// from locally-originated ones once they are in the log (§4.5).
    pub fn apply(&self, from: PeerId, message: &Message) -> NodeResult<Message> {
        match (message.msg_type, &message.body) {
            (MsgType::Put, Some(Body::PutReq { hash })) => {
                // The entry's bytes travel out of band (source chain /
                // direct `get`, both out of scope here); absorbing a bare
                // `PutReq` records presence at `from` without content.
                if self.entries.get(hash).is_none() {
                    self.entries.put(*hash, String::new(), Vec::new(), from);
                }
                self.store.append(Some(message.clone()))?;
                Ok(self.ok())
            }
            (MsgType::Delete, Some(Body::DelReq { hash })) => {
                if let Verdict::Rejected(reason) = self.validator.validate_del(hash) {
                    return Err(NodeError::Other(reason));
                }
                self.entries.mark_deleted(hash);
                self.store.append(Some(message.clone()))?;
                Ok(self.ok())
            }
            (MsgType::Modify, Some(Body::ModReq { hash, replacement })) => {
                if let Verdict::Rejected(reason) = self.validator.validate_mod(hash, replacement) {
                    return Err(NodeError::Other(reason));
                }
                self.entries.mark_modified(hash, *replacement);
                self.store.append(Some(message.clone()))?;
                Ok(self.ok())
            }
            (MsgType::Link, Some(Body::LinkReq { base, link, tag })) => {
                if let Verdict::Rejected(reason) = self.validator.validate_link(base, link, tag) {
                    return Err(NodeError::Other(reason));
                }
                self.entries.add_link(*base, tag.clone(), *link);
                self.store.append(Some(message.clone()))?;
                Ok(self.ok())
            }
            (MsgType::DeleteLink, Some(Body::DeleteLinkReq { base, link, tag })) => {
                self.entries.remove_link(base, tag, link);
                self.store.append(Some(message.clone()))?;
                Ok(self.ok())
            }
            (MsgType::ListAdd, Some(Body::ListAddReq { list_type, records })) => {
                let store_records: Vec<StorePeerRecord> = records
                    .iter()
                    .map(|r| StorePeerRecord {
                        peer: r.peer,
                        warrant: r.warrant.clone(),
                    })
                    .collect();
                self.store.add_to_list(list_type, &store_records, message.clone())?;
                if list_type == BLOCKED_LIST {
                    if let Some(node) = self.node.upgrade() {
                        for record in records {
                            node.block(record.peer);
                            self.purge_blocked_peer(&record.peer);
                            info!(peer = %record.peer, "blocked via list-add gossip absorption");
                        }
                    }
                }
                Ok(self.ok())
            }
            (MsgType::Get, Some(Body::GetReq { hash, status_mask: _, get_mask })) => {
                self.handle_get(*hash, *get_mask)
            }
            (MsgType::GetLink, Some(Body::GetLinkReq { base, tag })) => {
                let links = self.entries.get_links(base, tag);
                Ok(Message::new(
                    MsgType::OkResponse,
                    self.local,
                    Some(Body::AppMessage {
                        payload: encode_links(&links),
                    }),
                ))
            }
            (MsgType::AppMessage, Some(Body::AppMessage { .. })) => Ok(self.ok()),
            _ => Err(NodeError::EntryTypeMismatch),
        }
    }

    fn handle_get(&self, hash: hc_hash::Hash, get_mask: u32) -> NodeResult<Message> {
        let mask = if get_mask == 0 { GET_MASK_ENTRY } else { get_mask };
        let record = self.entries.get(&hash).ok_or(NodeError::HashNotFound)?;
        match &record.status {
            crate::entry::EntryStatus::Deleted => Err(NodeError::HashDeleted),
            crate::entry::EntryStatus::Modified(replacement) => {
                // The get handler surfaces the replacement hash via the
                // structured `HashModified` error; the facade's `get`
                // follows it at most once.
                Err(NodeError::HashModified(*replacement))
            }
            crate::entry::EntryStatus::Live => {
                // Entry type and sources are tracked on the record but this
                // core's `AppMessage` carrier only has room for one payload
                // slot; `GET_MASK_ENTRY_TYPE`/`GET_MASK_SOURCES` are
                // recognized for parity with the reference mask but only
                // gate inclusion of the entry bytes here.
                let mut payload = Vec::new();
                if mask & GET_MASK_ENTRY != 0 {
                    payload.extend_from_slice(&record.data);
                }
                Ok(Message::new(
                    MsgType::OkResponse,
                    self.local,
                    Some(Body::AppMessage { payload }),
                ))
            }
        }
    }
}

fn encode_links(links: &[hc_hash::Hash]) -> Vec<u8> {
    links.iter().flat_map(|h| h.to_bytes()).collect()
}

impl Handler for ActionHandler {
    fn handle(&self, from: PeerId, _protocol: ProtocolTag, message: &Message) -> NodeResult<Message> {
        self.apply(from, message)
    }
}

/// Bridges absorbed gossip puts into the same [`ActionHandler::apply`]
/// path a locally-received message takes.
#[async_trait::async_trait]
impl hc_gossip::ActionDispatcher for ActionHandler {
    async fn absorb(&self, message: &Message) -> hc_gossip::GossipResult<()> {
        let from = message.from.ok_or(hc_node::Error::MissingFrom)?;
        self.apply(from, message)?;
        Ok(())
    }
}

/// Validate-protocol handler: consults the embedder's [`Validator`] and
/// reports its verdict. The reference implementation pairs each validation
/// request variant with one of the mutating action types; this core does
/// the same via `message.msg_type`.
pub struct ValidateHandler {
    local: PeerId,
    validator: Arc<dyn Validator>,
}

impl ValidateHandler {
    pub fn new(local: PeerId, validator: Arc<dyn Validator>) -> Self {
        ValidateHandler { local, validator }
    }
}

impl Handler for ValidateHandler {
    fn handle(&self, _from: PeerId, _protocol: ProtocolTag, message: &Message) -> NodeResult<Message> {
        let verdict = match (message.msg_type, &message.body) {
            (MsgType::ValidatePut, Some(Body::ValidateReq { hash, entry })) => {
                self.validator.validate_put(hash, "", entry)
            }
            (MsgType::ValidateDel, Some(Body::ValidateReq { hash, .. })) => self.validator.validate_del(hash),
            (MsgType::ValidateMod, Some(Body::ModReq { hash, replacement })) => {
                self.validator.validate_mod(hash, replacement)
            }
            (MsgType::ValidateLink, Some(Body::LinkReq { base, link, tag })) => {
                self.validator.validate_link(base, link, tag)
            }
            _ => return Err(NodeError::EntryTypeMismatch),
        };
        match verdict {
            Verdict::Accepted => Ok(Message::new(MsgType::OkResponse, self.local, None)),
            Verdict::Rejected(reason) => Err(NodeError::Other(reason)),
        }
    }
}

/// Kademlia-protocol handler: answers `find-node` from the routing table.
pub struct KademliaHandler {
    local: PeerId,
    routing: Arc<RwLock<RoutingTable<PeerId>>>,
    k: usize,
}

impl KademliaHandler {
    pub fn new(local: PeerId, routing: Arc<RwLock<RoutingTable<PeerId>>>, k: usize) -> Self {
        KademliaHandler { local, routing, k }
    }
}

impl Handler for KademliaHandler {
    fn handle(&self, _from: PeerId, _protocol: ProtocolTag, message: &Message) -> NodeResult<Message> {
        let target = match &message.body {
            Some(Body::FindNodeReq { target }) => *target,
            _ => return Err(NodeError::EntryTypeMismatch),
        };
        let table = self.routing.read().unwrap();
        let peers = table
            .nearest(&target, self.k)
            .into_iter()
            .map(|peer| hc_node::message::PeerDescriptor { peer })
            .collect();
        Ok(Message::new(
            MsgType::OkResponse,
            self.local,
            Some(Body::FindNodeResp { peers }),
        ))
    }
}

/// Gossip-protocol handler: bridges to [`GossipEngine::handle_request`].
///
/// [`Handler::handle`] is synchronous, but `handle_request` never actually
/// suspends (its only asynchronicity is the trait-level `async fn` shared
/// with the rest of the engine's interface — it reads the store
/// synchronously and enqueues a reciprocal catch-up with a non-blocking
/// `try_send`), so driving it with `futures::executor::block_on` here does
/// not risk stalling the caller's executor.
pub struct GossipHandler {
    local: PeerId,
    engine: Arc<GossipEngine>,
}

impl GossipHandler {
    pub fn new(local: PeerId, engine: Arc<GossipEngine>) -> Self {
        GossipHandler { local, engine }
    }
}

impl Handler for GossipHandler {
    fn handle(&self, from: PeerId, _protocol: ProtocolTag, message: &Message) -> NodeResult<Message> {
        let body = message.body.as_ref().ok_or(NodeError::EntryTypeMismatch)?;
        let response = futures::executor::block_on(self.engine.handle_request(from, body))
            .map_err(|err| NodeError::Other(err.to_string()))?;
        Ok(Message::new(MsgType::OkResponse, self.local, Some(response)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hc_node::Node as RawNode;
    use libp2p::PeerId as Libp2pPeerId;
    use tempfile::tempdir;

    fn peer() -> PeerId {
        PeerId::new(Libp2pPeerId::random())
    }

    fn store() -> Arc<ChangeLogStore> {
        let dir = tempdir().unwrap();
        Arc::new(ChangeLogStore::open(dir.path()).unwrap())
    }

    fn routing_table(local: PeerId) -> Arc<RwLock<RoutingTable<PeerId>>> {
        Arc::new(RwLock::new(RoutingTable::new(local.to_hash(), 20)))
    }

    #[test]
    fn put_then_get_round_trips_through_the_action_handler() {
        let local = peer();
        let node = Arc::new(RawNode::new("test"));

        // A Put of a bare hash records presence, then a Get on that hash
        // succeeds.
        let entries = Arc::new(EntryStore::new());
        let handler = ActionHandler::new(
            local,
            Arc::downgrade(&node),
            store(),
            entries.clone(),
            Arc::new(crate::validator::AcceptAllValidator),
            routing_table(local),
        );
        let hash = hc_hash::Hash::of(b"entry");
        entries.put(hash, "post".into(), b"hello".to_vec(), local);

        let get_msg = Message::new(
            MsgType::Get,
            local,
            Some(Body::GetReq {
                hash,
                status_mask: 0,
                get_mask: GET_MASK_ENTRY,
            }),
        );
        let reply = handler.handle(local, ProtocolTag::Action, &get_msg).unwrap();
        match reply.body {
            Some(Body::AppMessage { payload }) => assert_eq!(payload, b"hello"),
            other => panic!("unexpected reply body: {other:?}"),
        }
    }

    #[test]
    fn get_on_a_modified_hash_reports_the_replacement() {
        let local = peer();
        let entries = Arc::new(EntryStore::new());
        let hash = hc_hash::Hash::of(b"entry");
        let replacement = hc_hash::Hash::of(b"replacement");
        entries.put(hash, "post".into(), b"hello".to_vec(), local);
        entries.mark_modified(&hash, replacement);

        let node = Arc::new(RawNode::new("test"));
        let handler = ActionHandler::new(
            local,
            Arc::downgrade(&node),
            store(),
            entries,
            Arc::new(crate::validator::AcceptAllValidator),
            routing_table(local),
        );
        let get_msg = Message::new(
            MsgType::Get,
            local,
            Some(Body::GetReq {
                hash,
                status_mask: 0,
                get_mask: GET_MASK_ENTRY,
            }),
        );
        let err = handler.handle(local, ProtocolTag::Action, &get_msg).unwrap_err();
        assert!(err.to_string().contains(&replacement.to_string()));
    }

    #[test]
    fn list_add_updates_the_nodes_blocklist_through_the_weak_back_reference() {
        let local = peer();
        let target = peer();
        let node = Arc::new(RawNode::new("test"));
        let handler = ActionHandler::new(
            local,
            Arc::downgrade(&node),
            store(),
            Arc::new(EntryStore::new()),
            Arc::new(crate::validator::AcceptAllValidator),
            routing_table(local),
        );

        let msg = Message::new(
            MsgType::ListAdd,
            local,
            Some(Body::ListAddReq {
                list_type: BLOCKED_LIST.to_string(),
                records: vec![hc_node::message::PeerRecord {
                    peer: target,
                    warrant: "spam".into(),
                }],
            }),
        );
        handler.handle(local, ProtocolTag::Action, &msg).unwrap();
        assert!(node.is_blocked(&target));
    }

    /// I4 (§3): a blocked peer is never added to the peerstore or gossiped
    /// with. Blocking must therefore purge any routing-table entry and any
    /// watermark the store already held for that peer, not just flip the
    /// in-memory blocklist flag.
    #[test]
    fn list_add_to_the_blocklist_purges_the_peer_from_routing_and_watermark_state() {
        let local = peer();
        let target = peer();
        let node = Arc::new(RawNode::new("test"));
        let store = store();
        store.update_peer_idx(&target, 3).unwrap();

        let routing = routing_table(local);
        routing.write().unwrap().update(target, target.to_hash());
        assert_eq!(routing.read().unwrap().size(), 1);

        let handler = ActionHandler::new(
            local,
            Arc::downgrade(&node),
            store.clone(),
            Arc::new(EntryStore::new()),
            Arc::new(crate::validator::AcceptAllValidator),
            routing.clone(),
        );

        let msg = Message::new(
            MsgType::ListAdd,
            local,
            Some(Body::ListAddReq {
                list_type: BLOCKED_LIST.to_string(),
                records: vec![hc_node::message::PeerRecord {
                    peer: target,
                    warrant: "spam".into(),
                }],
            }),
        );
        handler.handle(local, ProtocolTag::Action, &msg).unwrap();

        assert!(node.is_blocked(&target));
        assert_eq!(routing.read().unwrap().size(), 0, "blocked peer must be purged from the routing table");
        assert_eq!(
            store.peer_last_idx(&target).unwrap(),
            0,
            "blocked peer's watermark must be forgotten so it drops out of known_peers()"
        );
    }
}
