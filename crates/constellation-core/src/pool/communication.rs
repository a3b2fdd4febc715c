//! CommunicationLayer - Transport の上の薄いアダプタ
//!
//! # 責務
//! - Message のエンコード／デコード（MessageCodec）
//! - passive / active / terminated の状態管理
//! - 受信フレームを MessageHandler へ upcall するディスパッチタスク
//! - 選挙結果のキャッシュと、マスター・ランク・メンバーのビュー
//!
//! 送信は `bool` を返すだけです。失敗の扱い（ロールバック、ログ）は呼び出し側が決めます。

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use super::election::ElectionCache;
use crate::domain::{Message, NodeId, PoolSnapshot};
use crate::error::CommError;
use crate::ports::{MessageHandler, Transport};
use crate::sync::{lock, read, write};
use crate::typed::MessageCodec;

const PASSIVE: u8 = 0;
const ACTIVE: u8 = 1;
const TERMINATED: u8 = 2;

/// How often `get_election_result` asks the transport again.
const ELECTION_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Default)]
struct MembershipView {
    master: Option<NodeId>,
    rank: Option<u32>,
    members: Vec<NodeId>,
}

pub struct CommunicationLayer {
    transport: Arc<dyn Transport>,
    state: AtomicU8,
    view: RwLock<MembershipView>,
    elections: ElectionCache,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl CommunicationLayer {
    /// Created passive: nothing is sent or received until `activate`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            state: AtomicU8::new(PASSIVE),
            view: RwLock::new(MembershipView::default()),
            elections: ElectionCache::new(),
            dispatcher: Mutex::new(None),
        }
    }

    pub fn my_identifier(&self) -> &NodeId {
        self.transport.local_node()
    }

    pub fn is_active(&self) -> bool {
        self.state.load(Ordering::Acquire) == ACTIVE
    }

    pub fn is_terminated(&self) -> bool {
        self.state.load(Ordering::Acquire) == TERMINATED
    }

    /// Start delivering inbound messages to `handler`.
    pub fn activate(&self, handler: Arc<dyn MessageHandler>) -> Result<(), CommError> {
        if self
            .state
            .compare_exchange(PASSIVE, ACTIVE, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CommError::Inactive);
        }
        let mut inbound = self
            .transport
            .take_inbound()
            .ok_or_else(|| CommError::Transport("inbound channel already taken".to_string()))?;
        let me = self.my_identifier().clone();

        let join = tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                match MessageCodec::decode(&frame.bytes) {
                    Ok(message) => {
                        debug!(node = %me, from = %frame.source, op = ?message.opcode(), "message received");
                        handler.on_message(frame.source, message).await;
                    }
                    Err(e) => {
                        warn!(node = %me, from = %frame.source, error = %e, "dropping undecodable frame");
                    }
                }
            }
            debug!(node = %me, "dispatcher stopped");
        });
        *lock(&self.dispatcher) = Some(join);
        info!(node = %self.my_identifier(), "communication layer active");
        Ok(())
    }

    /// Encode and send. `false` when inactive or when the transport fails.
    pub async fn send_message(&self, dest: &NodeId, message: &Message) -> bool {
        match self.try_send(dest, message).await {
            Ok(()) => true,
            Err(e) => {
                debug!(node = %self.my_identifier(), to = %dest, op = ?message.opcode(), error = %e, "send failed");
                false
            }
        }
    }

    pub async fn try_send(&self, dest: &NodeId, message: &Message) -> Result<(), CommError> {
        if !self.is_active() {
            return Err(CommError::Inactive);
        }
        let frame = MessageCodec::encode(message).map_err(|e| CommError::Codec(e.to_string()))?;
        self.transport
            .send(dest, frame)
            .await
            .map_err(|_| CommError::SendFailed(dest.clone()))
    }

    /// Send to every node in `dests`; returns the nodes that could not be reached.
    pub async fn broadcast(&self, dests: &[NodeId], message: &Message) -> Vec<NodeId> {
        let mut failed = Vec::new();
        for dest in dests {
            if !self.send_message(dest, message).await {
                failed.push(dest.clone());
            }
        }
        failed
    }

    pub fn master(&self) -> Option<NodeId> {
        read(&self.view).master.clone()
    }

    pub fn rank(&self) -> Option<u32> {
        read(&self.view).rank
    }

    pub fn pool_size(&self) -> usize {
        read(&self.view).members.len()
    }

    pub fn node_identifiers(&self) -> Vec<NodeId> {
        read(&self.view).members.clone()
    }

    pub fn update_view(&self, snapshot: &PoolSnapshot) {
        let mut view = write(&self.view);
        view.master = snapshot.master.clone();
        view.members = snapshot.members.clone();
    }

    pub fn set_rank(&self, rank: u32) {
        write(&self.view).rank = Some(rank);
    }

    pub fn clear_view(&self) {
        *write(&self.view) = MembershipView::default();
    }

    /// Run the election for `tag` with this node as a candidate.
    pub async fn elect(&self, tag: &str) -> Result<NodeId, CommError> {
        if let Some(winner) = self.elections.get(tag) {
            return Ok(winner);
        }
        let winner = self
            .transport
            .elect(tag)
            .await
            .map_err(|e| CommError::Transport(e.to_string()))?;
        let winner = self.elections.record(tag, winner);
        info!(node = %self.my_identifier(), tag, winner = %winner, "election decided");
        Ok(winner)
    }

    /// Wait up to `timeout` for the winner of `tag` without standing as a candidate.
    pub async fn get_election_result(&self, tag: &str, timeout: Duration) -> Option<NodeId> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(winner) = self.elections.get(tag) {
                return Some(winner);
            }
            if let Some(winner) = self.transport.election_result(tag).await {
                return Some(self.elections.record(tag, winner));
            }
            if Instant::now() >= deadline {
                return None;
            }
            sleep(ELECTION_POLL).await;
        }
    }

    /// Learned from a peer (an `Elect` announcement or a snapshot's master).
    pub fn record_election(&self, tag: &str, winner: NodeId) -> NodeId {
        self.elections.record(tag, winner)
    }

    pub fn cached_election(&self, tag: &str) -> Option<NodeId> {
        self.elections.get(tag)
    }

    /// Stop sending and receiving. Idempotent.
    pub async fn terminate(&self) {
        if self.state.swap(TERMINATED, Ordering::AcqRel) == TERMINATED {
            return;
        }
        if let Some(join) = lock(&self.dispatcher).take() {
            join.abort();
        }
        self.transport.shutdown().await;
        info!(node = %self.my_identifier(), "communication layer terminated");
    }

    /// Drop cached views and election results. Only after `terminate`.
    pub async fn cleanup(&self) {
        if !self.is_terminated() {
            warn!(node = %self.my_identifier(), "cleanup before terminate, terminating first");
            self.terminate().await;
        }
        self.clear_view();
        self.elections.clear();
    }

    pub async fn cleanup_node(&self, node: &NodeId) {
        self.transport.release_peer(node).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryNetwork;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct Forward(mpsc::UnboundedSender<(NodeId, Message)>);

    #[async_trait]
    impl MessageHandler for Forward {
        async fn on_message(&self, source: NodeId, message: Message) {
            let _ = self.0.send((source, message));
        }
    }

    fn terminate_msg() -> Message {
        Message::Terminate {
            tag: "p".to_string(),
        }
    }

    #[tokio::test]
    async fn passive_layer_does_not_send() {
        let net = InMemoryNetwork::new();
        let a = CommunicationLayer::new(net.connect(NodeId::new("a")));
        let _b = net.connect(NodeId::new("b"));

        assert!(!a.is_active());
        assert!(!a.send_message(&NodeId::new("b"), &terminate_msg()).await);
        assert_eq!(
            a.try_send(&NodeId::new("b"), &terminate_msg()).await,
            Err(CommError::Inactive)
        );
    }

    #[tokio::test]
    async fn delivers_decoded_messages_to_handler() {
        let net = InMemoryNetwork::new();
        let a = CommunicationLayer::new(net.connect(NodeId::new("a")));
        let b = CommunicationLayer::new(net.connect(NodeId::new("b")));

        let (tx, mut rx) = mpsc::unbounded_channel();
        a.activate(Arc::new(Forward(mpsc::unbounded_channel().0))).unwrap();
        b.activate(Arc::new(Forward(tx))).unwrap();

        assert!(a.send_message(&NodeId::new("b"), &terminate_msg()).await);
        let (source, message) = rx.recv().await.unwrap();
        assert_eq!(source, NodeId::new("a"));
        assert_eq!(message, terminate_msg());
    }

    #[tokio::test]
    async fn activate_twice_is_rejected() {
        let net = InMemoryNetwork::new();
        let a = CommunicationLayer::new(net.connect(NodeId::new("a")));
        a.activate(Arc::new(Forward(mpsc::unbounded_channel().0))).unwrap();
        assert!(a.activate(Arc::new(Forward(mpsc::unbounded_channel().0))).is_err());
    }

    #[tokio::test]
    async fn unreachable_peer_reports_false() {
        let net = InMemoryNetwork::new();
        let a = CommunicationLayer::new(net.connect(NodeId::new("a")));
        a.activate(Arc::new(Forward(mpsc::unbounded_channel().0))).unwrap();
        assert!(!a.send_message(&NodeId::new("nobody"), &terminate_msg()).await);
    }

    #[tokio::test]
    async fn election_is_idempotent_and_visible_to_observers() {
        let net = InMemoryNetwork::new();
        let a = CommunicationLayer::new(net.connect(NodeId::new("a")));
        let b = CommunicationLayer::new(net.connect(NodeId::new("b")));
        let c = CommunicationLayer::new(net.connect(NodeId::new("c")));

        assert_eq!(
            c.get_election_result("p", Duration::from_millis(30)).await,
            None
        );

        let first = a.elect("p").await.unwrap();
        let second = b.elect("p").await.unwrap();
        assert_eq!(first, NodeId::new("a"));
        assert_eq!(second, first);
        assert_eq!(a.elect("p").await.unwrap(), first);

        assert_eq!(
            c.get_election_result("p", Duration::from_millis(100)).await,
            Some(first)
        );
    }

    #[tokio::test]
    async fn terminate_stops_traffic_and_cleanup_clears_view() {
        let net = InMemoryNetwork::new();
        let a = CommunicationLayer::new(net.connect(NodeId::new("a")));
        let _b = net.connect(NodeId::new("b"));
        a.activate(Arc::new(Forward(mpsc::unbounded_channel().0))).unwrap();
        a.update_view(&PoolSnapshot {
            tag: "p".to_string(),
            master: Some(NodeId::new("a")),
            members: vec![NodeId::new("a"), NodeId::new("b")],
            timestamp: 2,
            profiles: vec![],
        });
        a.set_rank(0);
        assert_eq!(a.pool_size(), 2);
        assert_eq!(a.rank(), Some(0));

        a.terminate().await;
        assert!(a.is_terminated());
        assert!(!a.send_message(&NodeId::new("b"), &terminate_msg()).await);

        a.cleanup().await;
        assert_eq!(a.pool_size(), 0);
        assert_eq!(a.master(), None);
    }
}
