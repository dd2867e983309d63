//! The gossip engine: neighborhood selection, the watermark-bounded
//! exchange, and reciprocal catch-up.

use std::sync::Arc;

use hc_hash::sort_by_distance;
use hc_node::{Body, Entry, Message, PeerId};
use hc_store::ChangeLogStore;
use rand::seq::SliceRandom;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::config::GossipConfig;
use crate::error::{GossipError, GossipResult};

/// Sends a gossip request to `target` and returns its response body. The
/// concrete implementation (a libp2p request-response exchange, or an
/// in-process shortcut in tests) lives in the caller that owns the swarm.
#[async_trait::async_trait]
pub trait GossipTransport: Send + Sync {
    async fn send_gossip(&self, target: PeerId, my_idx: u64, your_idx: u64) -> GossipResult<Vec<Entry>>;
}

/// Absorbs a put received during gossip into the DHT, producing the local
/// change-log entry that witnesses its reception. Implemented by whatever
/// owns the Action protocol's handler.
#[async_trait::async_trait]
pub trait ActionDispatcher: Send + Sync {
    async fn absorb(&self, message: &Message) -> GossipResult<()>;
}

/// Drives eventual consistency between this node's change log and its
/// neighborhood's.
pub struct GossipEngine {
    local: PeerId,
    store: Arc<ChangeLogStore>,
    transport: Arc<dyn GossipTransport>,
    action: Arc<dyn ActionDispatcher>,
    config: GossipConfig,
    /// G2: serializes gossip exchanges across all peers.
    gossip_lock: Mutex<()>,
    command_tx: mpsc::Sender<PeerId>,
    command_rx: Mutex<Option<mpsc::Receiver<PeerId>>>,
}

impl GossipEngine {
    pub fn new(
        local: PeerId,
        store: Arc<ChangeLogStore>,
        transport: Arc<dyn GossipTransport>,
        action: Arc<dyn ActionDispatcher>,
        config: GossipConfig,
    ) -> Arc<Self> {
        let (command_tx, command_rx) = mpsc::channel(256);
        Arc::new(GossipEngine {
            local,
            store,
            transport,
            action,
            config,
            gossip_lock: Mutex::new(()),
            command_tx,
            command_rx: Mutex::new(Some(command_rx)),
        })
    }

    /// Picks the gossip neighborhood: the configured top-K known peers by
    /// XOR distance to the local hash.
    fn neighborhood(&self) -> GossipResult<Vec<PeerId>> {
        let known = self.store.known_peers()?;
        if known.is_empty() {
            return Err(GossipError::NoGossipersAvailable);
        }
        let local_hash = self.local.to_hash();
        let hashes: Vec<_> = known.iter().map(PeerId::to_hash).collect();
        let ordered = sort_by_distance(&local_hash, &hashes);

        let k = self.config.neighborhood_size as usize;
        let mut out = Vec::with_capacity(k.min(known.len()));
        let mut remaining = known.clone();
        for h in ordered.into_iter().take(k) {
            if let Some(pos) = remaining.iter().position(|p| p.to_hash() == h) {
                out.push(remaining.swap_remove(pos));
            }
        }
        Ok(out)
    }

    /// Picks one gossip target uniformly at random from the neighborhood
    /// and enqueues a `gossip_with` request.
    pub async fn tick(&self) -> GossipResult<()> {
        let neighborhood = self.neighborhood()?;
        let target = *neighborhood
            .choose(&mut rand::thread_rng())
            .expect("neighborhood is non-empty, checked above");
        self.command_tx
            .send(target)
            .await
            .map_err(|_| GossipError::ChannelClosed)
    }

    /// Runs the ticker loop until `config.gossip_interval_ms == 0` or the
    /// engine is dropped. Spawned as its own task per DHT instance.
    pub async fn run_ticker(self: Arc<Self>) {
        let Some(interval) = self.config.gossip_interval() else {
            debug!("gossip ticker disabled (gossip_interval_ms == 0)");
            return;
        };
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(err) = self.tick().await {
                match err {
                    GossipError::NoGossipersAvailable => {
                        debug!("no gossipers available this tick");
                    }
                    other => warn!(error = %other, "gossip tick failed"),
                }
            }
        }
    }

    /// The single dispatcher task: drains the command channel and runs
    /// each `gossip_with` exchange to completion before taking the next.
    /// Owning the gossip lock implicitly by being the sole executor is
    /// reinforced by the explicit `gossip_lock`, so a reciprocal enqueue
    /// from inside a receive handler can never race a ticker-driven
    /// exchange already in flight.
    pub async fn run_dispatcher(self: Arc<Self>) {
        let mut rx = match self.command_rx.lock().await.take() {
            Some(rx) => rx,
            None => {
                warn!("gossip dispatcher started twice; ignoring");
                return;
            }
        };
        while let Some(target) = rx.recv().await {
            if let Err(err) = self.gossip_with(target).await {
                warn!(error = %err, "gossip exchange failed");
            }
        }
    }

    /// A handle that can enqueue `gossip_with` requests without running
    /// the dispatcher itself, for use by the receive-side reciprocal
    /// catch-up path.
    pub fn handle(self: &Arc<Self>) -> GossipHandle {
        GossipHandle {
            command_tx: self.command_tx.clone(),
        }
    }

    /// Runs one gossip exchange with `target`: requests its tail beyond
    /// our watermark, absorbs unseen puts in order, and advances the
    /// watermark if any were processed.
    pub async fn gossip_with(&self, target: PeerId) -> GossipResult<()> {
        let _guard = self.gossip_lock.lock().await;

        let my_idx = self.store.current_idx()?;
        let your_idx = self.store.peer_last_idx(&target)?;

        let puts = self
            .transport
            .send_gossip(target, my_idx, your_idx + 1)
            .await?;

        let mut ok = true;
        let mut highest = your_idx;
        for (offset, put) in puts.into_iter().enumerate() {
            if !ok {
                break;
            }
            let expected_idx = your_idx + 1 + offset as u64;
            let fp = hc_node::fingerprint(put.message.as_ref());
            if self.store.have_fingerprint(&fp)? {
                highest = expected_idx;
                continue;
            }
            match &put.message {
                Some(message) => match self.action.absorb(message).await {
                    Ok(()) => {
                        highest = expected_idx;
                    }
                    Err(err) => {
                        warn!(error = %err, idx = expected_idx, "failed to absorb gossiped put");
                        ok = false;
                    }
                },
                None => {
                    highest = expected_idx;
                }
            }
        }

        if ok && highest > your_idx {
            self.store.update_peer_idx(&target, highest)?;
            info!(peer = %target, watermark = highest, "advanced gossip watermark");
        }
        Ok(())
    }

    /// Handles an inbound `GossipReq` body, producing the `Gossip`
    /// response body and enqueuing a reciprocal exchange if the sender is
    /// ahead of what we have absorbed from them.
    pub async fn handle_request(&self, from: PeerId, body: &Body) -> GossipResult<Body> {
        let (sender_my_idx, your_idx) = match body {
            Body::GossipReq { my_idx, your_idx } => (*my_idx, *your_idx),
            _ => return Err(GossipError::ExpectedGossipReq),
        };

        let puts = self
            .store
            .puts_since(your_idx)?
            .into_iter()
            .map(|e| Entry {
                idx: e.idx,
                message: e.message,
            })
            .collect();

        if self.store.peer_last_idx(&from)? < sender_my_idx {
            let _ = self.command_tx.try_send(from);
        }

        Ok(Body::Gossip { puts })
    }
}

/// A cloneable handle for enqueuing `gossip_with` requests onto the
/// dispatcher's channel without holding a reference to the engine itself.
#[derive(Clone)]
pub struct GossipHandle {
    command_tx: mpsc::Sender<PeerId>,
}

impl GossipHandle {
    pub async fn gossip_with(&self, target: PeerId) -> GossipResult<()> {
        self.command_tx
            .send(target)
            .await
            .map_err(|_| GossipError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hc_node::MsgType;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    struct FakeTransport {
        puts: StdMutex<Vec<Entry>>,
        calls: AtomicU64,
    }

    #[async_trait::async_trait]
    impl GossipTransport for FakeTransport {
        async fn send_gossip(&self, _target: PeerId, _my_idx: u64, _your_idx: u64) -> GossipResult<Vec<Entry>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.puts.lock().unwrap().clone())
        }
    }

    struct AbsorbingAction {
        store: Arc<ChangeLogStore>,
    }

    #[async_trait::async_trait]
    impl ActionDispatcher for AbsorbingAction {
        async fn absorb(&self, message: &Message) -> GossipResult<()> {
            self.store.append(Some(message.clone()))?;
            Ok(())
        }
    }

    fn peer() -> PeerId {
        PeerId::new(libp2p::PeerId::random())
    }

    fn open_store() -> Arc<ChangeLogStore> {
        let dir = tempdir().unwrap();
        Arc::new(ChangeLogStore::open(dir.path()).unwrap())
    }

    #[tokio::test]
    async fn gossip_with_absorbs_unseen_puts_and_advances_the_watermark() {
        let local = peer();
        let remote = peer();
        let store = open_store();

        let entries: Vec<Entry> = (0..5)
            .map(|i| Entry {
                idx: 0,
                message: Some(Message::new(MsgType::Put, remote, Some(Body::Raw(format!("e{i}"))))),
            })
            .collect();

        let transport = Arc::new(FakeTransport {
            puts: StdMutex::new(entries),
            calls: AtomicU64::new(0),
        });
        let action = Arc::new(AbsorbingAction { store: store.clone() });

        let engine = GossipEngine::new(
            local,
            store.clone(),
            transport.clone(),
            action,
            GossipConfig::default(),
        );

        engine.gossip_with(remote).await.unwrap();
        assert_eq!(store.peer_last_idx(&remote).unwrap(), 5);
        assert_eq!(store.current_idx().unwrap(), 5);
    }

    #[tokio::test]
    async fn gossip_with_skips_already_known_fingerprints() {
        let local = peer();
        let remote = peer();
        let store = open_store();

        let message = Message::new(MsgType::Put, remote, Some(Body::Raw("dup".into())));
        store.append(Some(message.clone())).unwrap();

        let transport = Arc::new(FakeTransport {
            puts: StdMutex::new(vec![Entry { idx: 0, message: Some(message) }]),
            calls: AtomicU64::new(0),
        });
        let action = Arc::new(AbsorbingAction { store: store.clone() });
        let engine = GossipEngine::new(local, store.clone(), transport, action, GossipConfig::default());

        engine.gossip_with(remote).await.unwrap();
        // The put's fingerprint was already known, so nothing new was
        // appended and the watermark advances to the (already current)
        // single entry.
        assert_eq!(store.current_idx().unwrap(), 1);
        assert_eq!(store.peer_last_idx(&remote).unwrap(), 1);
    }

    #[tokio::test]
    async fn neighborhood_selection_errors_when_no_peers_are_known() {
        let local = peer();
        let store = open_store();
        let transport = Arc::new(FakeTransport {
            puts: StdMutex::new(vec![]),
            calls: AtomicU64::new(0),
        });
        let action = Arc::new(AbsorbingAction { store: store.clone() });
        let engine = GossipEngine::new(local, store, transport, action, GossipConfig::default());

        let err = engine.tick().await.unwrap_err();
        assert!(matches!(err, GossipError::NoGossipersAvailable));
    }

    #[tokio::test]
    async fn handle_request_responds_with_our_own_tail_and_queues_reciprocal_catchup() {
        let local = peer();
        let remote = peer();
        let store = open_store();
        for i in 0..3 {
            store
                .append(Some(Message::new(MsgType::Put, local, Some(Body::Raw(format!("l{i}"))))))
                .unwrap();
        }

        let transport = Arc::new(FakeTransport {
            puts: StdMutex::new(vec![]),
            calls: AtomicU64::new(0),
        });
        let action = Arc::new(AbsorbingAction { store: store.clone() });
        let engine = GossipEngine::new(local, store, transport, action, GossipConfig::default());

        let body = Body::GossipReq { my_idx: 10, your_idx: 1 };
        let response = engine.handle_request(remote, &body).await.unwrap();
        match response {
            Body::Gossip { puts } => assert_eq!(puts.len(), 3),
            _ => panic!("expected a Gossip response body"),
        }
    }

    #[tokio::test]
    async fn handle_request_rejects_a_non_gossip_body() {
        let local = peer();
        let remote = peer();
        let store = open_store();
        let transport = Arc::new(FakeTransport {
            puts: StdMutex::new(vec![]),
            calls: AtomicU64::new(0),
        });
        let action = Arc::new(AbsorbingAction { store: store.clone() });
        let engine = GossipEngine::new(local, store, transport, action, GossipConfig::default());

        let err = engine
            .handle_request(remote, &Body::Raw("not a gossip request".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, GossipError::ExpectedGossipReq));
    }
}
