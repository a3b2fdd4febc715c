//! Node identity and rank.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Process-wide node identity.
///
/// Wraps the transport-native identity; equality and hash delegate to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Dense rank handed out when a node joins a pool. Rank 0 is the master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankInfo {
    rank: u32,
    node: NodeId,
}

impl RankInfo {
    pub const MASTER_RANK: u32 = 0;

    pub fn new(rank: u32, node: NodeId) -> Self {
        Self { rank, node }
    }

    pub fn rank(&self) -> u32 {
        self.rank
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    pub fn is_master(&self) -> bool {
        self.rank == Self::MASTER_RANK
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn node_id_equality_and_hash() {
        let mut set = HashSet::new();
        set.insert(NodeId::new("node-1"));
        set.insert(NodeId::new("node-1"));
        set.insert(NodeId::new("node-2"));

        assert_eq!(set.len(), 2);
    }

    #[test]
    fn rank_zero_is_master() {
        assert!(RankInfo::new(0, NodeId::new("m")).is_master());
        assert!(!RankInfo::new(3, NodeId::new("w")).is_master());
    }
}
