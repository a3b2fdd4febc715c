//! Node - 1 プロセス分のランタイム
//!
//! Scheduler / CommunicationLayer / PoolCoordinator / executor 群をまとめ、
//! 起動（activate）から終了（done）までを管理します。
//!
//! # ライフサイクル
//! 1. `NodeBuilder::build()` - passive。まだ何も送受信しない
//! 2. `activate()` - 受信開始、プール参加、executor 起動
//! 3. `submit*` / `send` - 仕事を投入
//! 4. `done()` - プール離脱、executor 停止、トランスポート解放

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::builder::NodeBuilder;
use super::collector::{CollectorHandle, SingleEventCollector};
use super::config::NodeConfig;
use super::executor::{ExecutorGroup, RemoteSteal};
use super::scheduler::{Outbound, Route, Scheduler};
use super::status::NodeStats;
use crate::domain::{ActivityContext, ActivityId, Event, NodeId, PoolSnapshot, RankInfo};
use crate::error::{ConstellationError, SubmitError};
use crate::pool::{CommunicationLayer, PoolCoordinator};
use crate::ports::{IdGenerator, Transport};
use crate::sync::lock;
use crate::typed::{Activity, ActivityRegistry};

pub struct Node {
    config: NodeConfig,
    scheduler: Arc<Scheduler>,
    comm: Arc<CommunicationLayer>,
    coordinator: Arc<PoolCoordinator>,
    outbound: Mutex<Option<mpsc::UnboundedReceiver<Outbound>>>,
    executors: Mutex<Option<ExecutorGroup>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    pub fn builder(transport: Arc<dyn Transport>, config: NodeConfig) -> NodeBuilder {
        NodeBuilder::new(transport, config)
    }

    pub(crate) fn assemble(
        transport: Arc<dyn Transport>,
        config: NodeConfig,
        registry: ActivityRegistry,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let (scheduler, outbound) = Scheduler::new(
            transport.local_node().clone(),
            Arc::clone(&ids),
            Arc::new(registry),
            config.executors.clone(),
            config.failure_policy,
        );
        let scheduler = Arc::new(scheduler);
        let comm = Arc::new(CommunicationLayer::new(transport));
        let coordinator = Arc::new(PoolCoordinator::new(
            Arc::clone(&comm),
            Arc::clone(&scheduler),
            ids,
            config.steal.remote_timeout(),
        ));
        Self {
            config,
            scheduler,
            comm,
            coordinator,
            outbound: Mutex::new(Some(outbound)),
            executors: Mutex::new(None),
            background: Mutex::new(Vec::new()),
        }
    }

    pub fn identifier(&self) -> &NodeId {
        self.comm.my_identifier()
    }

    pub fn pool_tag(&self) -> &str {
        &self.config.pool
    }

    /// Start receiving, join the configured pool and start the executors.
    pub async fn activate(&self) -> Result<(), ConstellationError> {
        self.comm.activate(self.coordinator.clone())?;

        let outbound = lock(&self.outbound).take();
        if let Some(mut outbound) = outbound {
            let coordinator = Arc::clone(&self.coordinator);
            let forwarder = tokio::spawn(async move {
                while let Some(message) = outbound.recv().await {
                    coordinator.deliver_outbound(message).await;
                }
            });
            lock(&self.background).push(forwarder);
        }

        self.coordinator.join(&self.config.pool).await?;

        let remote = self.config.steal.remote.then(|| RemoteSteal {
            coordinator: Arc::clone(&self.coordinator),
            tag: self.config.pool.clone(),
        });
        let group = ExecutorGroup::spawn(
            Arc::clone(&self.scheduler),
            remote,
            &self.config.steal,
            self.coordinator.shutdown_signal(),
        );
        info!(
            node = %self.identifier(),
            pool = %self.config.pool,
            executors = group.len(),
            "node active"
        );
        *lock(&self.executors) = Some(group);
        Ok(())
    }

    /// Wait until the pool membership is known (immediately true on the master).
    pub async fn wait_for_pool(&self, timeout: Duration) -> bool {
        self.coordinator.wait_joined(&self.config.pool, timeout).await
    }

    pub fn submit<A: Activity>(&self, activity: A) -> Result<ActivityId, SubmitError> {
        self.scheduler.submit(activity, None)
    }

    pub fn submit_child<A: Activity>(
        &self,
        parent: &ActivityId,
        activity: A,
    ) -> Result<ActivityId, SubmitError> {
        self.scheduler.submit(activity, Some(parent.clone()))
    }

    /// Submit a collector; its handle yields the first event sent to it.
    pub fn submit_collector(
        &self,
        context: ActivityContext,
    ) -> Result<(ActivityId, CollectorHandle), SubmitError> {
        let (collector, handle) = SingleEventCollector::new(context);
        let id = self.scheduler.submit(collector, None)?;
        Ok((id, handle))
    }

    /// Send an event from outside any activity.
    ///
    /// Remote delivery is attempted right away so that an unreachable node is
    /// reported to the caller.
    pub async fn send<T: Serialize>(
        &self,
        target: &ActivityId,
        data: &T,
    ) -> Result<(), ConstellationError> {
        let data = serde_json::to_value(data).map_err(|e| ConstellationError::Encode(e.to_string()))?;
        match self.scheduler.route(Event::new(None, target.clone(), data)) {
            Route::Local => Ok(()),
            Route::Remote(dest, event) => Ok(self.coordinator.forward_event(&dest, event).await?),
            Route::Dropped(event) => {
                warn!(node = %self.identifier(), target = %event.target, "no route for event, dropping it");
                Ok(())
            }
        }
    }

    pub fn is_master(&self) -> bool {
        self.coordinator.is_master(&self.config.pool)
    }

    pub fn rank(&self) -> Option<RankInfo> {
        self.coordinator.rank(&self.config.pool)
    }

    pub fn pool_snapshot(&self) -> Option<PoolSnapshot> {
        self.coordinator.pool_snapshot(&self.config.pool)
    }

    pub fn stats(&self) -> NodeStats {
        self.scheduler.stats()
    }

    pub async fn get_election_result(&self, timeout: Duration) -> Option<NodeId> {
        self.coordinator
            .get_election_result(&self.config.pool, timeout)
            .await
    }

    pub async fn leave(&self) -> Result<(), ConstellationError> {
        self.coordinator.leave(&self.config.pool).await
    }

    /// Master only: stop every node of the pool.
    pub async fn terminate_pool(&self) -> Result<(), ConstellationError> {
        self.coordinator.terminate_pool(&self.config.pool).await
    }

    pub fn is_shut_down(&self) -> bool {
        self.coordinator.is_shut_down()
    }

    /// Resolves once the pool is terminated or `done` is called.
    pub async fn wait_for_shutdown(&self) {
        let mut signal = self.coordinator.shutdown_signal();
        // the sender lives as long as the coordinator, which outlives this call
        let _ = signal.wait_for(|stopped| *stopped).await;
    }

    /// Leave every pool, stop the executors and release the transport.
    pub async fn done(&self) {
        if !self.is_shut_down() {
            for tag in self.coordinator.pool_tags() {
                if let Err(e) = self.coordinator.leave(&tag).await {
                    warn!(node = %self.identifier(), tag, error = %e, "leaving the pool failed");
                }
            }
        }
        self.coordinator.request_shutdown();

        let group = lock(&self.executors).take();
        if let Some(group) = group {
            group.join().await;
        }
        self.comm.terminate().await;
        for handle in lock(&self.background).drain(..) {
            handle.abort();
        }
        self.comm.cleanup().await;

        let stats = self.stats();
        info!(
            node = %self.identifier(),
            finished = stats.finished,
            live = stats.live,
            stolen_remote = stats.stolen_remote,
            served_remote = stats.served_remote,
            "node done"
        );
    }
}
