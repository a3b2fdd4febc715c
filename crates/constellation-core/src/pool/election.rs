//! ElectionCache - tag ごとの選挙結果（書き込みは一度だけ）

use std::collections::HashMap;
use std::sync::Mutex;

use crate::domain::NodeId;
use crate::sync::lock;

/// Once a winner is known for a tag it never changes on this node.
#[derive(Debug, Default)]
pub struct ElectionCache {
    winners: Mutex<HashMap<String, NodeId>>,
}

impl ElectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `winner` unless a result already exists; returns the cached winner.
    pub fn record(&self, tag: &str, winner: NodeId) -> NodeId {
        lock(&self.winners)
            .entry(tag.to_string())
            .or_insert(winner)
            .clone()
    }

    pub fn get(&self, tag: &str) -> Option<NodeId> {
        lock(&self.winners).get(tag).cloned()
    }

    pub fn clear(&self) {
        lock(&self.winners).clear();
    }
}
