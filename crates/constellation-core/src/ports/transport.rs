//! Transport port - ノード間通信とグループメンバーシップ
//!
//! Transport はバイト列を運ぶだけです（Message のエンコードは
//! CommunicationLayer 側）。選挙（elect）もここに委譲します。
//!
//! # 実装
//! - **InMemoryTransport**: 開発・テスト用（impls/inmem_transport）

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::NodeId;

/// One encoded message as received from a peer.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub source: NodeId,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("node {0} is unreachable")]
    Unreachable(NodeId),

    #[error("transport is closed")]
    Closed,
}

/// Transport は point-to-point 配送と選挙プリミティブを提供
///
/// # 設計原則
/// - 受信は push 型: `take_inbound()` で受け取ったチャネルに届く
/// - `elect()` は同じ tag に対して常に同じ勝者を返す
#[async_trait]
pub trait Transport: Send + Sync {
    /// Globally unique identity of this process.
    fn local_node(&self) -> &NodeId;

    async fn send(&self, dest: &NodeId, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Inbound frames. Handed out once; later calls return `None`.
    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<InboundFrame>>;

    /// Run (or join) the election for `tag` with this node as a candidate.
    async fn elect(&self, tag: &str) -> Result<NodeId, TransportError>;

    /// Winner of `tag` if it is already decided, without becoming a candidate.
    async fn election_result(&self, tag: &str) -> Option<NodeId>;

    /// Release whatever the transport holds for a departed peer.
    async fn release_peer(&self, peer: &NodeId);

    async fn shutdown(&self);
}
