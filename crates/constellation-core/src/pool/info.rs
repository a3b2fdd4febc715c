//! PoolInfo - プールごとのメンバーシップ
//!
//! # 不変条件
//! - メンバーリストは挿入順で、重複しない
//! - timestamp はメンバー変更ごとにちょうど 1 増える（コンストラクタは 1 から）
//! - dummy は「tag に興味を登録したが、まだ構成を知らない」状態
//!
//! ロックは持ちません。所有者（PoolCoordinator）が tag ごとに Mutex で包みます。

use rand::Rng;

use crate::domain::{MemberProfile, NodeId, PoolSnapshot, RankInfo};
use crate::error::PoolError;

#[derive(Debug, Clone)]
pub struct PoolInfo {
    tag: String,
    master: Option<NodeId>,
    is_master: bool,
    is_dummy: bool,
    timestamp: u64,
    members: Vec<NodeId>,
    /// Next rank handed out by the master. Rank 0 is the master itself.
    next_rank: u32,
}

impl PoolInfo {
    /// Membership with `master` as the only member.
    pub fn new(tag: impl Into<String>, master: NodeId, is_master: bool) -> Self {
        Self {
            tag: tag.into(),
            members: vec![master.clone()],
            master: Some(master),
            is_master,
            is_dummy: false,
            timestamp: 1,
            next_rank: RankInfo::MASTER_RANK + 1,
        }
    }

    /// Placeholder until the master's snapshot arrives.
    pub fn dummy(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            master: None,
            is_master: false,
            is_dummy: true,
            timestamp: 1,
            members: Vec::new(),
            next_rank: RankInfo::MASTER_RANK + 1,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn master(&self) -> Option<&NodeId> {
        self.master.as_ref()
    }

    pub fn is_master(&self) -> bool {
        self.is_master
    }

    pub fn is_dummy(&self) -> bool {
        self.is_dummy
    }

    pub fn add_member(&mut self, id: NodeId) -> Result<(), PoolError> {
        if self.members.contains(&id) {
            return Err(PoolError::DuplicateMember {
                tag: self.tag.clone(),
                node: id,
            });
        }
        self.members.push(id);
        self.timestamp += 1;
        Ok(())
    }

    /// Removes `id` if present. The timestamp moves even when it was absent.
    pub fn remove_member(&mut self, id: &NodeId) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m != id);
        self.timestamp += 1;
        self.members.len() != before
    }

    pub fn has_members(&self) -> bool {
        !self.members.is_empty()
    }

    pub fn n_members(&self) -> usize {
        self.members.len()
    }

    pub fn current_timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn members(&self) -> &[NodeId] {
        &self.members
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.members.contains(id)
    }

    /// Uniformly pick one member. Callers check `has_members()` first.
    pub fn select_random<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&NodeId> {
        debug_assert!(self.has_members(), "select_random on empty pool '{}'", self.tag);
        if self.members.is_empty() {
            return None;
        }
        let idx = rng.gen_range(0..self.members.len());
        self.members.get(idx)
    }

    /// Uniformly pick a member other than `me` (victim selection for remote steals).
    pub fn select_random_excluding<R: Rng + ?Sized>(
        &self,
        me: &NodeId,
        rng: &mut R,
    ) -> Option<&NodeId> {
        let others: Vec<&NodeId> = self.members.iter().filter(|m| *m != me).collect();
        if others.is_empty() {
            return None;
        }
        Some(others[rng.gen_range(0..others.len())])
    }

    pub fn allocate_rank(&mut self) -> u32 {
        let rank = self.next_rank;
        self.next_rank += 1;
        rank
    }

    pub fn snapshot(&self, profiles: Vec<MemberProfile>) -> PoolSnapshot {
        PoolSnapshot {
            tag: self.tag.clone(),
            master: self.master.clone(),
            members: self.members.clone(),
            timestamp: self.timestamp,
            profiles,
        }
    }

    /// Adopt a snapshot received from the master.
    ///
    /// The authoritative copy on the master never changes this way; other
    /// copies only move forward in time, except a dummy which takes the
    /// first snapshot it sees.
    pub fn apply_snapshot(&mut self, snapshot: &PoolSnapshot) -> bool {
        if self.is_master || snapshot.tag != self.tag {
            return false;
        }
        if !self.is_dummy && snapshot.timestamp <= self.timestamp {
            return false;
        }
        self.master = snapshot.master.clone();
        self.members = snapshot.members.clone();
        self.timestamp = snapshot.timestamp;
        self.is_dummy = false;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rstest::rstest;
    use std::collections::BTreeSet;

    fn node(s: &str) -> NodeId {
        NodeId::new(s)
    }

    #[test]
    fn master_constructor_scenario() {
        let m = node("M");
        let n = node("N");
        let mut info = PoolInfo::new("X", m.clone(), true);
        assert_eq!(info.n_members(), 1);
        assert!(info.has_members());
        assert_eq!(info.current_timestamp(), 1);

        info.add_member(n).unwrap();
        assert_eq!(info.n_members(), 2);
        assert_eq!(info.current_timestamp(), 2);

        assert!(info.remove_member(&m));
        assert_eq!(info.n_members(), 1);
        assert_eq!(info.current_timestamp(), 3);
    }

    #[rstest]
    #[case(&["+a", "+b", "-a", "+c"])]
    #[case(&["-z", "-z", "+q"])]
    #[case(&["+a", "-a", "+a", "-a", "-a"])]
    #[case(&[])]
    fn timestamp_counts_every_mutation(#[case] ops: &[&str]) {
        let mut info = PoolInfo::new("X", node("m"), true);
        let mut expected: BTreeSet<String> = BTreeSet::from(["m".to_string()]);

        for op in ops {
            let (kind, name) = op.split_at(1);
            if kind == "+" {
                info.add_member(node(name)).unwrap();
                expected.insert(name.to_string());
            } else {
                info.remove_member(&node(name));
                expected.remove(name);
            }
        }

        assert_eq!(info.current_timestamp(), 1 + ops.len() as u64);
        assert_eq!(info.n_members(), expected.len());
    }

    #[test]
    fn duplicate_add_is_rejected_without_touching_the_timestamp() {
        let mut info = PoolInfo::new("X", node("m"), true);
        let err = info.add_member(node("m")).unwrap_err();
        assert!(matches!(err, PoolError::DuplicateMember { .. }));
        assert_eq!(info.current_timestamp(), 1);
        assert_eq!(info.n_members(), 1);
    }

    #[test]
    fn members_keep_insertion_order() {
        let mut info = PoolInfo::new("X", node("m"), true);
        info.add_member(node("c")).unwrap();
        info.add_member(node("a")).unwrap();
        info.add_member(node("b")).unwrap();
        info.remove_member(&node("a"));
        assert_eq!(info.members(), &[node("m"), node("c"), node("b")]);
    }

    #[test]
    fn select_random_stays_in_member_set() {
        let mut info = PoolInfo::new("X", node("m"), true);
        for name in ["a", "b", "c", "d"] {
            info.add_member(node(name)).unwrap();
        }
        info.remove_member(&node("b"));

        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = BTreeSet::new();
        for _ in 0..500 {
            let picked = info.select_random(&mut rng).unwrap().clone();
            assert!(info.contains(&picked));
            seen.insert(picked);
        }
        // 4 members, 500 draws: every one of them shows up
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn select_random_excluding_self() {
        let mut info = PoolInfo::new("X", node("m"), true);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(info.select_random_excluding(&node("m"), &mut rng), None);

        info.add_member(node("w")).unwrap();
        for _ in 0..50 {
            assert_eq!(
                info.select_random_excluding(&node("m"), &mut rng),
                Some(&node("w"))
            );
        }
    }

    #[test]
    fn dummy_is_promoted_by_first_snapshot() {
        let mut info = PoolInfo::dummy("X");
        assert!(info.is_dummy());
        assert!(!info.has_members());
        assert_eq!(info.master(), None);

        let snapshot = PoolSnapshot {
            tag: "X".to_string(),
            master: Some(node("m")),
            members: vec![node("m"), node("me")],
            timestamp: 2,
            profiles: vec![],
        };
        assert!(info.apply_snapshot(&snapshot));
        assert!(!info.is_dummy());
        assert_eq!(info.master(), Some(&node("m")));
        assert_eq!(info.n_members(), 2);
        assert_eq!(info.current_timestamp(), 2);
    }

    #[test]
    fn stale_snapshots_are_ignored() {
        let mut info = PoolInfo::dummy("X");
        let newer = PoolSnapshot {
            tag: "X".to_string(),
            master: Some(node("m")),
            members: vec![node("m"), node("a"), node("b")],
            timestamp: 3,
            profiles: vec![],
        };
        let older = PoolSnapshot {
            members: vec![node("m"), node("a")],
            timestamp: 2,
            ..newer.clone()
        };
        assert!(info.apply_snapshot(&newer));
        assert!(!info.apply_snapshot(&older));
        assert_eq!(info.n_members(), 3);
    }

    #[test]
    fn master_copy_is_authoritative() {
        let mut info = PoolInfo::new("X", node("m"), true);
        let snapshot = PoolSnapshot {
            tag: "X".to_string(),
            master: Some(node("other")),
            members: vec![],
            timestamp: 99,
            profiles: vec![],
        };
        assert!(!info.apply_snapshot(&snapshot));
        assert_eq!(info.master(), Some(&node("m")));
    }

    #[test]
    fn ranks_are_dense_after_master() {
        let mut info = PoolInfo::new("X", node("m"), true);
        assert_eq!(info.allocate_rank(), 1);
        assert_eq!(info.allocate_rank(), 2);
        assert_eq!(info.allocate_rank(), 3);
    }
}
