//! NodeStats - ノードの状態スナップショット
//!
//! 「なぜ終わらないのか」を説明するための数字です。
//! カウンタは単調増加、ready / suspended は取得時点の値です。

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeStats {
    /// Queued on executors or waiting to be stolen.
    pub ready: usize,
    /// Waiting for events.
    pub suspended: usize,
    /// Activities currently held by this node.
    pub live: usize,
    /// Forwarding entries for activities that moved on.
    pub relocated: usize,

    pub submitted: u64,
    pub finished: u64,
    pub failed: u64,
    /// Taken from a sibling executor's queue.
    pub stolen_local: u64,
    /// Adopted from another node.
    pub stolen_remote: u64,
    /// Handed to another node.
    pub served_remote: u64,
    pub forwarded_events: u64,
    pub dropped_events: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) submitted: AtomicU64,
    pub(crate) finished: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) stolen_local: AtomicU64,
    pub(crate) stolen_remote: AtomicU64,
    pub(crate) served_remote: AtomicU64,
    pub(crate) forwarded_events: AtomicU64,
    pub(crate) dropped_events: AtomicU64,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn fill(&self, stats: &mut NodeStats) {
        stats.submitted = self.submitted.load(Ordering::Relaxed);
        stats.finished = self.finished.load(Ordering::Relaxed);
        stats.failed = self.failed.load(Ordering::Relaxed);
        stats.stolen_local = self.stolen_local.load(Ordering::Relaxed);
        stats.stolen_remote = self.stolen_remote.load(Ordering::Relaxed);
        stats.served_remote = self.served_remote.load(Ordering::Relaxed);
        stats.forwarded_events = self.forwarded_events.load(Ordering::Relaxed);
        stats.dropped_events = self.dropped_events.load(Ordering::Relaxed);
    }
}
