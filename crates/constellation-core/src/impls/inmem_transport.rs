//! InMemoryNetwork / InMemoryTransport - 開発・テスト用のトランスポート
//!
//! # 学習ポイント
//! - 共有ハブ（Arc<Mutex<..>>）にノードごとの mpsc チャネルをぶら下げる
//! - 選挙は「最初に立候補したノードが勝つ」。tag ごとに決定的
//! - `isolate` / `heal` でネットワーク分断を注入できる
//!
//! # 使用例
//! ```ignore
//! let net = InMemoryNetwork::new();
//! let a = net.connect(NodeId::new("a"));
//! let b = net.connect(NodeId::new("b"));
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::NodeId;
use crate::ports::{InboundFrame, Transport, TransportError};
use crate::sync::lock;

#[derive(Default)]
struct NetworkState {
    inboxes: HashMap<NodeId, mpsc::UnboundedSender<InboundFrame>>,
    isolated: HashSet<NodeId>,
    elections: HashMap<String, NodeId>,
}

/// Shared hub every in-memory transport talks through.
#[derive(Clone, Default)]
pub struct InMemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `node` and hand out its transport.
    pub fn connect(&self, node: NodeId) -> Arc<InMemoryTransport> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.state).inboxes.insert(node.clone(), tx);
        Arc::new(InMemoryTransport {
            node,
            network: self.clone(),
            inbound: Mutex::new(Some(rx)),
            peers: Mutex::new(HashSet::new()),
        })
    }

    /// Drop all traffic from and to `node` until `heal`.
    pub fn isolate(&self, node: &NodeId) {
        lock(&self.state).isolated.insert(node.clone());
    }

    pub fn heal(&self, node: &NodeId) {
        lock(&self.state).isolated.remove(node);
    }

    pub fn connected(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = lock(&self.state).inboxes.keys().cloned().collect();
        nodes.sort();
        nodes
    }

    pub fn election_winner(&self, tag: &str) -> Option<NodeId> {
        lock(&self.state).elections.get(tag).cloned()
    }
}

pub struct InMemoryTransport {
    node: NodeId,
    network: InMemoryNetwork,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<InboundFrame>>>,
    /// Peers this transport has sent to.
    peers: Mutex<HashSet<NodeId>>,
}

impl InMemoryTransport {
    pub fn known_peers(&self) -> usize {
        lock(&self.peers).len()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn local_node(&self) -> &NodeId {
        &self.node
    }

    async fn send(&self, dest: &NodeId, frame: Vec<u8>) -> Result<(), TransportError> {
        {
            let state = lock(&self.network.state);
            if state.isolated.contains(dest) || state.isolated.contains(&self.node) {
                return Err(TransportError::Unreachable(dest.clone()));
            }
            let inbox = state
                .inboxes
                .get(dest)
                .ok_or_else(|| TransportError::Unreachable(dest.clone()))?;
            inbox
                .send(InboundFrame {
                    source: self.node.clone(),
                    bytes: frame,
                })
                .map_err(|_| TransportError::Unreachable(dest.clone()))?;
        }
        lock(&self.peers).insert(dest.clone());
        Ok(())
    }

    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<InboundFrame>> {
        lock(&self.inbound).take()
    }

    async fn elect(&self, tag: &str) -> Result<NodeId, TransportError> {
        let mut state = lock(&self.network.state);
        if !state.inboxes.contains_key(&self.node) {
            return Err(TransportError::Closed);
        }
        Ok(state
            .elections
            .entry(tag.to_string())
            .or_insert_with(|| self.node.clone())
            .clone())
    }

    async fn election_result(&self, tag: &str) -> Option<NodeId> {
        self.network.election_winner(tag)
    }

    async fn release_peer(&self, peer: &NodeId) {
        lock(&self.peers).remove(peer);
        debug!(node = %self.node, peer = %peer, "peer released");
    }

    /// Leaves the network. Elections this node won are forgotten, so a later
    /// candidate for the same tag takes over.
    async fn shutdown(&self) {
        let mut state = lock(&self.network.state);
        state.inboxes.remove(&self.node);
        state.elections.retain(|_, winner| *winner != self.node);
    }
}
