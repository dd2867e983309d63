//! The node itself: a libp2p swarm behaviour combining the four
//! sub-protocols, the stream codec that frames [`Message`] values over the
//! wire, and the request/response contracts a caller uses to talk to peers.

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use libp2p::request_response::{self, Codec, ProtocolSupport};
use libp2p::swarm::NetworkBehaviour;
use libp2p::StreamProtocol;

use crate::error::{Error, ErrorResponse, Result};
use crate::message::Message;
use crate::peer_id::PeerId;
use crate::protocol::ProtocolTag;
use crate::wire::{read_frame, write_frame};

/// Either a successful reply body or a typed error, as carried back over
/// the wire in response to any request.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Reply {
    Ok(Message),
    Err(ErrorResponse),
}

/// Codec for framing [`Message`] requests and [`Reply`] responses over a
/// libp2p request-response stream.
///
/// Implemented in the explicit boxed-future style (rather than with
/// `async_trait` sugar) to match the `Codec` trait's own non-`async_trait`
/// signature.
#[derive(Debug, Clone, Default)]
pub struct MessageCodec;

impl Codec for MessageCodec {
    type Protocol = StreamProtocol;
    type Request = Message;
    type Response = Reply;

    fn read_request<'life0, 'life1, 'life2, 'async_trait, T>(
        &'life0 mut self,
        _protocol: &'life1 Self::Protocol,
        io: &'life2 mut T,
    ) -> Pin<Box<dyn std::future::Future<Output = io::Result<Self::Request>> + Send + 'async_trait>>
    where
        T: futures::AsyncRead + Unpin + Send + 'async_trait,
        'life0: 'async_trait,
        'life1: 'async_trait,
        'life2: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move { read_frame(io).await })
    }

    fn read_response<'life0, 'life1, 'life2, 'async_trait, T>(
        &'life0 mut self,
        _protocol: &'life1 Self::Protocol,
        io: &'life2 mut T,
    ) -> Pin<Box<dyn std::future::Future<Output = io::Result<Self::Response>> + Send + 'async_trait>>
    where
        T: futures::AsyncRead + Unpin + Send + 'async_trait,
        'life0: 'async_trait,
        'life1: 'async_trait,
        'life2: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move { read_frame(io).await })
    }

    fn write_request<'life0, 'life1, 'life2, 'async_trait, T>(
        &'life0 mut self,
        _protocol: &'life1 Self::Protocol,
        io: &'life2 mut T,
        req: Self::Request,
    ) -> Pin<Box<dyn std::future::Future<Output = io::Result<()>> + Send + 'async_trait>>
    where
        T: futures::AsyncWrite + Unpin + Send + 'async_trait,
        'life0: 'async_trait,
        'life1: 'async_trait,
        'life2: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move { write_frame(io, &req).await })
    }

    fn write_response<'life0, 'life1, 'life2, 'async_trait, T>(
        &'life0 mut self,
        _protocol: &'life1 Self::Protocol,
        io: &'life2 mut T,
        resp: Self::Response,
    ) -> Pin<Box<dyn std::future::Future<Output = io::Result<()>> + Send + 'async_trait>>
    where
        T: futures::AsyncWrite + Unpin + Send + 'async_trait,
        'life0: 'async_trait,
        'life1: 'async_trait,
        'life2: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move { write_frame(io, &resp).await })
    }
}

/// The combined libp2p behaviour: one request-response instance per
/// sub-protocol, each scoped to the node's mux id so unrelated DHTs sharing
/// a process never cross-talk.
#[derive(NetworkBehaviour)]
pub struct NodeBehaviour {
    pub action: request_response::Behaviour<MessageCodec>,
    pub validate: request_response::Behaviour<MessageCodec>,
    pub gossip: request_response::Behaviour<MessageCodec>,
    pub kademlia: request_response::Behaviour<MessageCodec>,
}

impl NodeBehaviour {
    /// Builds the combined behaviour, deriving each sub-protocol's wire
    /// identifier from `mux_id`.
    pub fn new(mux_id: &str) -> Self {
        let make = |tag: ProtocolTag| {
            let id = tag.wire_id(mux_id);
            let protocol = StreamProtocol::try_from_owned(id).expect("wire id is a valid protocol string");
            request_response::Behaviour::<MessageCodec>::new(
                [(protocol, ProtocolSupport::Full)],
                request_response::Config::default(),
            )
        };
        NodeBehaviour {
            action: make(ProtocolTag::Action),
            validate: make(ProtocolTag::Validate),
            gossip: make(ProtocolTag::Gossip),
            kademlia: make(ProtocolTag::Kademlia),
        }
    }
}

/// Dispatches an inbound [`Message`] to whatever absorbs it: the change log
/// store, the validation pipeline, the gossip engine, or the routing table,
/// depending on which protocol it arrived on. Implementations live in the
/// facade crate that owns all of those components; this crate only depends
/// on the trait, not on any implementation, so the protocol multiplexer
/// never needs to depend on the store or gossip engine directly.
pub trait Handler: Send + Sync {
    fn handle(&self, from: PeerId, protocol: ProtocolTag, message: &Message) -> Result<Message>;
}

/// Per-protocol handler registry and the send/receive contracts that use it.
///
/// `send` and `receive` follow the reference node's five-step contract:
/// reject a message with no `from`, reject a peer on the blocklist, check
/// the message type against the protocol's admissible set, dispatch to the
/// handler, and wrap the outcome as [`Reply::Ok`] or [`Reply::Err`].
pub struct Node {
    mux_id: String,
    handlers: HashMap<&'static str, Arc<dyn Handler>>,
    blocklist: std::sync::Mutex<std::collections::HashSet<PeerId>>,
}

impl Node {
    pub fn new(mux_id: impl Into<String>) -> Self {
        Node {
            mux_id: mux_id.into(),
            handlers: HashMap::new(),
            blocklist: std::sync::Mutex::new(std::collections::HashSet::new()),
        }
    }

    pub fn mux_id(&self) -> &str {
        &self.mux_id
    }

    pub fn register_handler(&mut self, protocol: ProtocolTag, handler: Arc<dyn Handler>) {
        self.handlers.insert(tag_key(protocol), handler);
    }

    pub fn block(&self, peer: PeerId) {
        self.blocklist.lock().unwrap().insert(peer);
    }

    pub fn unblock(&self, peer: &PeerId) {
        self.blocklist.lock().unwrap().remove(peer);
    }

    pub fn is_blocked(&self, peer: &PeerId) -> bool {
        self.blocklist.lock().unwrap().contains(peer)
    }

    /// Handles an inbound request arriving on `protocol`, producing the
    /// [`Reply`] to send back over the wire.
    pub fn receive(&self, protocol: ProtocolTag, message: Message) -> Reply {
        match self.try_receive(protocol, &message) {
            Ok(reply) => Reply::Ok(reply),
            Err(err) => Reply::Err(ErrorResponse::from(&err)),
        }
    }

    fn try_receive(&self, protocol: ProtocolTag, message: &Message) -> Result<Message> {
        let from = message.from.ok_or(Error::MissingFrom)?;
        if self.is_blocked(&from) {
            return Err(Error::Blocklisted);
        }
        protocol.check(message.msg_type)?;
        let handler = self
            .handlers
            .get(tag_key(protocol))
            .ok_or(Error::ProtocolMismatch(message.msg_type.name(), "unregistered"))?;
        handler.handle(from, protocol, message)
    }

    /// Validates an outbound request before it is handed to the swarm:
    /// rejects sending to a blocked peer and rejects a message type not
    /// admissible on `protocol`.
    pub fn prepare_send(&self, to: PeerId, protocol: ProtocolTag, message: &Message) -> Result<()> {
        if self.is_blocked(&to) {
            return Err(Error::Blocklisted);
        }
        protocol.check(message.msg_type)
    }
}

fn tag_key(tag: ProtocolTag) -> &'static str {
    match tag {
        ProtocolTag::Action => "action",
        ProtocolTag::Validate => "validate",
        ProtocolTag::Gossip => "gossip",
        ProtocolTag::Kademlia => "kademlia",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Body, MsgType};

    struct EchoHandler;

    impl Handler for EchoHandler {
        fn handle(&self, _from: PeerId, _protocol: ProtocolTag, message: &Message) -> Result<Message> {
            Ok(message.clone())
        }
    }

    fn peer() -> PeerId {
        PeerId::new(libp2p::PeerId::random())
    }

    #[test]
    fn receive_dispatches_to_the_registered_handler() {
        let mut node = Node::new("test-dna");
        node.register_handler(ProtocolTag::Action, Arc::new(EchoHandler));

        let from = peer();
        let msg = Message::new(MsgType::Put, from, Some(Body::Raw("hi".into())));
        let reply = node.receive(ProtocolTag::Action, msg.clone());
        assert_eq!(reply, Reply::Ok(msg));
    }

    #[test]
    fn receive_rejects_message_on_wrong_protocol() {
        let mut node = Node::new("test-dna");
        node.register_handler(ProtocolTag::Gossip, Arc::new(EchoHandler));

        let from = peer();
        let msg = Message::new(MsgType::Put, from, Some(Body::Raw("hi".into())));
        let reply = node.receive(ProtocolTag::Gossip, msg);
        match reply {
            Reply::Err(resp) => assert_eq!(resp.code, 0),
            Reply::Ok(_) => panic!("expected protocol mismatch"),
        }
    }

    #[test]
    fn receive_rejects_a_blocked_sender() {
        let mut node = Node::new("test-dna");
        node.register_handler(ProtocolTag::Action, Arc::new(EchoHandler));

        let from = peer();
        node.block(from);
        let msg = Message::new(MsgType::Put, from, Some(Body::Raw("hi".into())));
        let reply = node.receive(ProtocolTag::Action, msg);
        match reply {
            Reply::Err(resp) => assert_eq!(resp.code, 7),
            Reply::Ok(_) => panic!("expected blocklisted error"),
        }
    }

    #[test]
    fn prepare_send_rejects_blocked_recipient() {
        let mut node = Node::new("test-dna");
        let to = peer();
        node.block(to);
        let msg = Message::new(MsgType::Put, peer(), Some(Body::Raw("hi".into())));
        assert!(node.prepare_send(to, ProtocolTag::Action, &msg).is_err());
    }

    #[test]
    fn protocol_wire_ids_are_scoped_to_mux_id() {
        let behaviour_mux = "my-dna";
        assert_eq!(
            ProtocolTag::Action.wire_id(behaviour_mux),
            "/hc-action-my-dna/0.0.0"
        );
    }
}
