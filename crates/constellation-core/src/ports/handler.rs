//! MessageHandler port - 受信メッセージの upcall 先

use async_trait::async_trait;

use crate::domain::{Message, NodeId};

/// Receives decoded messages from the communication layer's dispatcher task.
///
/// Implementations must not block for long: the dispatcher handles one
/// message at a time.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, source: NodeId, message: Message);
}
