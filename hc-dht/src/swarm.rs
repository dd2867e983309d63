//! The swarm driver: the single task that owns the libp2p `Swarm` and
//! translates between it and the rest of the facade.
//!
//! Follows the reference gossip service's own `run_swarm` shape: a
//! command channel the rest of the process uses to ask for outbound
//! sends, and a `tokio::select!` loop that interleaves swarm events with
//! those commands. The difference from a gossipsub-style broadcast service
//! is that every exchange here is a single request/response round trip,
//! so the command carries a oneshot reply channel rather than fanning out
//! to a broadcast event stream.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt as _;
use hc_node::node::{NodeBehaviour, NodeBehaviourEvent, Reply};
use hc_node::{Message, Node, PeerId, ProtocolTag};
use libp2p::request_response::{self, OutboundRequestId};
use libp2p::swarm::SwarmEvent;
use libp2p::{Multiaddr, Swarm, SwarmBuilder};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{DhtError, DhtResult};

/// A request to send `message` to `target` over `protocol` and get back
/// either its `Reply` or a transport-level failure.
pub struct SendCommand {
    pub protocol: ProtocolTag,
    pub target: PeerId,
    pub message: Message,
    pub reply: oneshot::Sender<DhtResult<Reply>>,
}

/// Commands the rest of the process can issue to the swarm task.
pub enum DriverCommand {
    Send(SendCommand),
    Dial(Multiaddr),
    Shutdown,
}

/// A cloneable handle for submitting commands to a running [`SwarmDriver`].
#[derive(Clone)]
pub struct SwarmHandle {
    tx: mpsc::Sender<DriverCommand>,
    local: PeerId,
}

impl SwarmHandle {
    /// Sends `message` to `target` over `protocol` and awaits the reply.
    /// Step 3-5 of the send contract (§4.4): open a stream, write, read,
    /// close on every exit path, decode an error-response back into a
    /// typed error.
    pub async fn send(&self, protocol: ProtocolTag, target: PeerId, message: Message) -> DhtResult<Message> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(DriverCommand::Send(SendCommand {
                protocol,
                target,
                message,
                reply: reply_tx,
            }))
            .await
            .map_err(|_| DhtError::SwarmGone)?;
        match reply_rx.await.map_err(|_| DhtError::SwarmGone)?? {
            Reply::Ok(msg) => Ok(msg),
            Reply::Err(resp) => Err(DhtError::Protocol(resp.into())),
        }
    }

    pub async fn dial(&self, addr: Multiaddr) -> DhtResult<()> {
        self.tx
            .send(DriverCommand::Dial(addr))
            .await
            .map_err(|_| DhtError::SwarmGone)
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(DriverCommand::Shutdown).await;
    }
}

/// The gossip engine's view of the network: a `GossipReq` is just another
/// request sent over the Gossip protocol, whose response body must be a
/// `Gossip { puts }`.
#[async_trait::async_trait]
impl hc_gossip::GossipTransport for SwarmHandle {
    async fn send_gossip(
        &self,
        target: PeerId,
        my_idx: u64,
        your_idx: u64,
    ) -> hc_gossip::GossipResult<Vec<hc_node::Entry>> {
        let request = Message::new(
            hc_node::MsgType::Gossip,
            self.local,
            Some(hc_node::Body::GossipReq { my_idx, your_idx }),
        );
        let reply = self
            .send(ProtocolTag::Gossip, target, request)
            .await
            .map_err(|e| hc_gossip::GossipError::Transport(e.to_string()))?;
        match reply.body {
            Some(hc_node::Body::Gossip { puts }) => Ok(puts),
            _ => Err(hc_gossip::GossipError::ExpectedGossipReq),
        }
    }
}

/// Owns the libp2p swarm. Spawn [`SwarmDriver::run`] once per DHT instance;
/// every outbound send and every inbound stream flows through this task.
pub struct SwarmDriver {
    swarm: Swarm<NodeBehaviour>,
    /// Set via [`SwarmDriver::attach_node`] once the cyclic `Node`/handler
    /// wiring has completed — the swarm itself only needs `mux_id`, which
    /// is known before the node exists, so construction and node-attachment
    /// are split to break the Node -> handler -> gossip engine -> transport
    /// -> swarm dependency cycle.
    node: Option<Arc<Node>>,
    command_rx: mpsc::Receiver<DriverCommand>,
    pending: HashMap<OutboundRequestId, oneshot::Sender<DhtResult<Reply>>>,
}

impl SwarmDriver {
    /// Builds a TCP/noise/yamux swarm behind the four sub-protocols scoped
    /// to `mux_id`, and returns it paired with the handle used to drive it.
    pub fn new(mux_id: &str) -> DhtResult<(Self, SwarmHandle)> {
        let swarm = SwarmBuilder::with_new_identity()
            .with_tokio()
            .with_tcp(
                libp2p::tcp::Config::default(),
                libp2p::noise::Config::new,
                libp2p::yamux::Config::default,
            )
            .map_err(|e| DhtError::Transport(e.to_string()))?
            .with_behaviour(|_key| NodeBehaviour::new(mux_id))
            .map_err(|e| DhtError::Transport(e.to_string()))?
            .with_swarm_config(|c| c.with_idle_connection_timeout(Duration::from_secs(60)))
            .build();

        let local = PeerId::new(*swarm.local_peer_id());
        let (tx, rx) = mpsc::channel(256);
        Ok((
            SwarmDriver {
                swarm,
                node: None,
                command_rx: rx,
                pending: HashMap::new(),
            },
            SwarmHandle { tx, local },
        ))
    }

    /// Completes construction once the cyclic `Node` is built. Must be
    /// called before [`SwarmDriver::run`].
    pub fn attach_node(&mut self, node: Arc<Node>) {
        self.node = Some(node);
    }

    fn node(&self) -> &Arc<Node> {
        self.node.as_ref().expect("attach_node must be called before run")
    }

    pub fn local_peer_id(&self) -> libp2p::PeerId {
        *self.swarm.local_peer_id()
    }

    pub fn listen_on(&mut self, addr: Multiaddr) -> DhtResult<()> {
        self.swarm
            .listen_on(addr)
            .map(|_| ())
            .map_err(|e| DhtError::Transport(e.to_string()))
    }

    /// The driver's event loop. Runs until [`DriverCommand::Shutdown`] is
    /// received or the command channel is dropped, at which point the
    /// swarm (and every in-flight stream) is dropped with it.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                event = self.swarm.select_next_some() => self.handle_swarm_event(event),
                command = self.command_rx.recv() => {
                    match command {
                        Some(DriverCommand::Send(cmd)) => self.handle_send(cmd),
                        Some(DriverCommand::Dial(addr)) => {
                            if let Err(e) = self.swarm.dial(addr.clone()) {
                                warn!(?addr, error = %e, "failed to dial peer");
                            }
                        }
                        Some(DriverCommand::Shutdown) | None => {
                            info!("swarm driver shutting down");
                            break;
                        }
                    }
                }
            }
        }
    }

    fn handle_send(&mut self, cmd: SendCommand) {
        if let Err(err) = self.node().prepare_send(cmd.target, cmd.protocol, &cmd.message) {
            let _ = cmd.reply.send(Ok(Reply::Err((&err).into())));
            return;
        }

        if cmd.target == PeerId::new(self.local_peer_id()) {
            let reply = self.node().receive(cmd.protocol, cmd.message);
            let _ = cmd.reply.send(Ok(reply));
            return;
        }

        let libp2p_target = cmd.target.inner();
        let request_id = match cmd.protocol {
            ProtocolTag::Action => self.swarm.behaviour_mut().action.send_request(&libp2p_target, cmd.message),
            ProtocolTag::Validate => self
                .swarm
                .behaviour_mut()
                .validate
                .send_request(&libp2p_target, cmd.message),
            ProtocolTag::Gossip => self.swarm.behaviour_mut().gossip.send_request(&libp2p_target, cmd.message),
            ProtocolTag::Kademlia => self
                .swarm
                .behaviour_mut()
                .kademlia
                .send_request(&libp2p_target, cmd.message),
        };
        self.pending.insert(request_id, cmd.reply);
    }

    fn handle_swarm_event(&mut self, event: SwarmEvent<NodeBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => info!(%address, "listening"),
            SwarmEvent::Behaviour(NodeBehaviourEvent::Action(e)) => self.on_rr_event(ProtocolTag::Action, e),
            SwarmEvent::Behaviour(NodeBehaviourEvent::Validate(e)) => self.on_rr_event(ProtocolTag::Validate, e),
            SwarmEvent::Behaviour(NodeBehaviourEvent::Gossip(e)) => self.on_rr_event(ProtocolTag::Gossip, e),
            SwarmEvent::Behaviour(NodeBehaviourEvent::Kademlia(e)) => self.on_rr_event(ProtocolTag::Kademlia, e),
            other => debug!(?other, "swarm event"),
        }
    }

    fn on_rr_event(&mut self, protocol: ProtocolTag, event: request_response::Event<Message, Reply>) {
        match event {
            request_response::Event::Message { peer, message, .. } => match message {
                request_response::Message::Request { request, channel, .. } => {
                    let _ = peer;
                    let reply = self.node().receive(protocol, request);
                    let behaviour = self.swarm.behaviour_mut();
                    let sent = match protocol {
                        ProtocolTag::Action => behaviour.action.send_response(channel, reply),
                        ProtocolTag::Validate => behaviour.validate.send_response(channel, reply),
                        ProtocolTag::Gossip => behaviour.gossip.send_response(channel, reply),
                        ProtocolTag::Kademlia => behaviour.kademlia.send_response(channel, reply),
                    };
                    if sent.is_err() {
                        warn!(?protocol, "failed to send response: the requester's stream is already gone");
                    }
                }
                request_response::Message::Response { request_id, response } => {
                    if let Some(reply_tx) = self.pending.remove(&request_id) {
                        let _ = reply_tx.send(Ok(response));
                    }
                }
            },
            request_response::Event::OutboundFailure { request_id, error, .. } => {
                if let Some(reply_tx) = self.pending.remove(&request_id) {
                    let _ = reply_tx.send(Err(DhtError::Transport(error.to_string())));
                }
            }
            request_response::Event::InboundFailure { error, .. } => {
                warn!(?protocol, %error, "inbound request failed before a response could be sent");
            }
            request_response::Event::ResponseSent { .. } => {}
        }
    }
}
