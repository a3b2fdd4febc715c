//! Executor loop - 1 executor = 1 tokio タスク
//!
//! # 1 ラウンドの流れ
//! 1. 自分のキュー（wakeups → fresh の最新）
//! 2. 兄弟 executor のキューと relocatable キュー（最古）
//! 3. プールの他ノード（STEAL_REQUEST）
//! 4. どれも空なら backoff。新しい仕事の通知か shutdown で早めに起きる

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::backoff::StealBackoff;
use super::config::StealConfig;
use super::scheduler::Scheduler;
use crate::pool::PoolCoordinator;

/// Where idle executors look for work beyond this node.
#[derive(Clone)]
pub struct RemoteSteal {
    pub coordinator: Arc<PoolCoordinator>,
    pub tag: String,
}

/// Executor group handle.
/// - shutdown は外から渡された watch で伝わる
/// - `join()` で全 executor の終了を待てる
pub struct ExecutorGroup {
    joins: Vec<JoinHandle<()>>,
}

impl ExecutorGroup {
    /// Spawn one loop per executor of `scheduler`.
    pub fn spawn(
        scheduler: Arc<Scheduler>,
        remote: Option<RemoteSteal>,
        config: &StealConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let backoff = StealBackoff::from_config(config);
        let joins = (0..scheduler.executor_count())
            .map(|index| {
                let scheduler = Arc::clone(&scheduler);
                let remote = remote.clone();
                let backoff = backoff.clone();
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(async move {
                    executor_loop(index, scheduler, remote, backoff, shutdown_rx).await;
                })
            })
            .collect();
        Self { joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Wait for every executor. A step in progress always completes.
    pub async fn join(self) {
        for join in self.joins {
            let _ = join.await;
        }
    }
}

async fn executor_loop(
    index: usize,
    scheduler: Arc<Scheduler>,
    remote: Option<RemoteSteal>,
    backoff: StealBackoff,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let node = scheduler.node().clone();
    let accepts = scheduler.accepted_types();
    let profile = scheduler.executor_profile(index);
    let mut idle_rounds: u32 = 0;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        if let Some(id) = scheduler
            .next_local(index)
            .or_else(|| scheduler.steal_local(index))
        {
            scheduler.run(index, &id);
            idle_rounds = 0;
            tokio::task::yield_now().await;
            continue;
        }

        if let (Some(remote), Some(profile)) = (&remote, &profile) {
            match remote
                .coordinator
                .steal(&remote.tag, profile.clone(), accepts.clone())
                .await
            {
                Ok(Some(envelope)) => match scheduler.adopt(envelope, index) {
                    Ok(id) => {
                        scheduler.run(index, &id);
                        idle_rounds = 0;
                        continue;
                    }
                    Err(e) => warn!(node = %node, executor = index, error = %e, "stolen activity could not be decoded"),
                },
                Ok(None) => {}
                Err(e) => debug!(node = %node, executor = index, error = %e, "remote steal failed"),
            }
        }

        idle_rounds = idle_rounds.saturating_add(1);
        let delay = backoff.next_delay(idle_rounds);
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = scheduler.work_available().notified() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }
    debug!(node = %node, executor = index, "executor stopped");
}
