//! PoolCoordinator - プール参加・離脱・リモートスティール
//!
//! # 役割
//! - 選挙で決まったマスターが PoolInfo の正本を持ち、スナップショットを配る
//! - 他のメンバーは dummy から始めて、JoinReply / PoolSnapshot で追従する
//! - STEAL_REQUEST / STEAL_REPLY を RequestId で対応付ける
//! - 受信した EVENT を Scheduler に渡す（転送もそこで決まる）
//! - RETIRED で転送表の鎖をたどって掃除する
//! - マスターのプール作成前に届いた JoinRequest は pending_joins に預かる
//!
//! # ロック順序
//! PoolInfo の Mutex → directory の Mutex。
//! pending_joins の Mutex → pools の RwLock。await を跨いでロックを持たない。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

use super::communication::CommunicationLayer;
use super::info::PoolInfo;
use crate::app::scheduler::{Outbound, Scheduler};
use crate::domain::{
    ActivityEnvelope, ActivityId, Event, ExecutorProfile, MemberProfile, Message, NodeId, PoolSnapshot,
    RankInfo, RequestId,
};
use crate::error::{CommError, ConstellationError, PoolError};
use crate::ports::{IdGenerator, MessageHandler};
use crate::sync::{lock, read, write};

type StealWaiter = oneshot::Sender<Option<ActivityEnvelope>>;
type JoinWaiter = (NodeId, Vec<ExecutorProfile>);

enum LeaveOutcome {
    Dissolved,
    Removed(PoolSnapshot),
    Ignored,
}

pub struct PoolCoordinator {
    comm: Arc<CommunicationLayer>,
    scheduler: Arc<Scheduler>,
    ids: Arc<dyn IdGenerator>,
    pools: RwLock<HashMap<String, Arc<Mutex<PoolInfo>>>>,
    /// Assigned once per pool, never changed afterwards.
    ranks: RwLock<HashMap<String, RankInfo>>,
    /// Executor profiles of every node seen in a join request (and our own).
    directory: Mutex<HashMap<NodeId, Vec<ExecutorProfile>>>,
    pending_steals: Mutex<HashMap<RequestId, StealWaiter>>,
    /// Join requests that reached this node before it finished creating the pool.
    pending_joins: Mutex<HashMap<String, Vec<JoinWaiter>>>,
    steal_timeout: Duration,
    shutdown: watch::Sender<bool>,
}

impl PoolCoordinator {
    pub fn new(
        comm: Arc<CommunicationLayer>,
        scheduler: Arc<Scheduler>,
        ids: Arc<dyn IdGenerator>,
        steal_timeout: Duration,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            comm,
            scheduler,
            ids,
            pools: RwLock::new(HashMap::new()),
            ranks: RwLock::new(HashMap::new()),
            directory: Mutex::new(HashMap::new()),
            pending_steals: Mutex::new(HashMap::new()),
            pending_joins: Mutex::new(HashMap::new()),
            steal_timeout,
            shutdown,
        }
    }

    pub fn my_identifier(&self) -> &NodeId {
        self.comm.my_identifier()
    }

    fn pool(&self, tag: &str) -> Option<Arc<Mutex<PoolInfo>>> {
        read(&self.pools).get(tag).cloned()
    }

    pub fn pool_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = read(&self.pools).keys().cloned().collect();
        tags.sort();
        tags
    }

    pub fn pool_snapshot(&self, tag: &str) -> Option<PoolSnapshot> {
        let pool = self.pool(tag)?;
        let info = lock(&pool);
        Some(info.snapshot(self.profiles_for(info.members())))
    }

    pub fn is_master(&self, tag: &str) -> bool {
        read(&self.pools)
            .get(tag)
            .is_some_and(|pool| lock(pool).is_master())
    }

    pub fn rank(&self, tag: &str) -> Option<RankInfo> {
        read(&self.ranks).get(tag).cloned()
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn profiles_for(&self, members: &[NodeId]) -> Vec<MemberProfile> {
        let directory = lock(&self.directory);
        members
            .iter()
            .filter_map(|node| {
                directory.get(node).map(|executors| MemberProfile {
                    node: node.clone(),
                    executors: executors.clone(),
                })
            })
            .collect()
    }

    fn apply_local_view(&self, snapshot: &PoolSnapshot) {
        self.comm.update_view(snapshot);
        self.scheduler.update_remote_profiles(&snapshot.profiles);
    }

    /// Send `snapshot` to every member except this node and `skip`.
    async fn broadcast_snapshot(&self, snapshot: &PoolSnapshot, skip: Option<&NodeId>) {
        let me = self.my_identifier();
        let targets: Vec<NodeId> = snapshot
            .members
            .iter()
            .filter(|m| *m != me && Some(*m) != skip)
            .cloned()
            .collect();
        let message = Message::PoolSnapshot {
            snapshot: snapshot.clone(),
        };
        let failed = self.comm.broadcast(&targets, &message).await;
        if !failed.is_empty() {
            warn!(node = %me, tag = %snapshot.tag, failed = ?failed, "snapshot not delivered to every member");
        }
    }

    /// Elect a master for `tag`; the winner creates the pool, everyone else asks to join.
    pub async fn join(&self, tag: &str) -> Result<(), ConstellationError> {
        if self.pool(tag).is_some() {
            return Ok(());
        }
        let me = self.my_identifier().clone();
        lock(&self.directory).insert(me.clone(), self.scheduler.local_profiles());
        let winner = self.comm.elect(tag).await?;

        if winner == me {
            let info = PoolInfo::new(tag, me.clone(), true);
            let snapshot = info.snapshot(self.profiles_for(info.members()));
            write(&self.pools).insert(tag.to_string(), Arc::new(Mutex::new(info)));
            write(&self.ranks).insert(
                tag.to_string(),
                RankInfo::new(RankInfo::MASTER_RANK, me.clone()),
            );
            self.apply_local_view(&snapshot);
            self.comm.set_rank(RankInfo::MASTER_RANK);
            info!(node = %me, tag, "pool created, this node is master");

            let waiting = lock(&self.pending_joins).remove(tag).unwrap_or_default();
            for (node, executors) in waiting {
                self.on_join_request(tag.to_string(), node, executors).await;
            }
            return Ok(());
        }

        let stale = lock(&self.pending_joins).remove(tag);
        if let Some(waiting) = stale {
            warn!(node = %me, tag, master = %winner, dropped = waiting.len(), "buffered join requests dropped, this node is not master");
        }
        write(&self.pools).insert(tag.to_string(), Arc::new(Mutex::new(PoolInfo::dummy(tag))));
        let request = Message::JoinRequest {
            tag: tag.to_string(),
            node: me.clone(),
            executors: self.scheduler.local_profiles(),
        };
        self.comm.try_send(&winner, &request).await?;
        info!(node = %me, tag, master = %winner, "join requested");
        Ok(())
    }

    /// Wait until this node knows the membership of `tag`.
    pub async fn wait_joined(&self, tag: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let joined = read(&self.pools)
                .get(tag)
                .is_some_and(|pool| !lock(pool).is_dummy());
            if joined {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(5)).await;
        }
    }

    pub async fn leave(&self, tag: &str) -> Result<(), ConstellationError> {
        let pool = write(&self.pools)
            .remove(tag)
            .ok_or_else(|| PoolError::UnknownPool(tag.to_string()))?;
        write(&self.ranks).remove(tag);
        let me = self.my_identifier().clone();
        let (is_master, master, others) = {
            let info = lock(&pool);
            let others: Vec<NodeId> = info.members().iter().filter(|m| **m != me).cloned().collect();
            (info.is_master(), info.master().cloned(), others)
        };

        let message = Message::Leave {
            tag: tag.to_string(),
            node: me.clone(),
        };
        if is_master {
            let failed = self.comm.broadcast(&others, &message).await;
            if !failed.is_empty() {
                warn!(node = %me, tag, failed = ?failed, "leave not delivered to every member");
            }
        } else if let Some(master) = master {
            self.comm.try_send(&master, &message).await?;
        }
        info!(node = %me, tag, was_master = is_master, "left pool");
        Ok(())
    }

    /// Master only: tell every member to stop, then stop this node.
    pub async fn terminate_pool(&self, tag: &str) -> Result<(), ConstellationError> {
        let pool = self
            .pool(tag)
            .ok_or_else(|| PoolError::UnknownPool(tag.to_string()))?;
        let me = self.my_identifier().clone();
        let (is_master, others) = {
            let info = lock(&pool);
            let others: Vec<NodeId> = info.members().iter().filter(|m| **m != me).cloned().collect();
            (info.is_master(), others)
        };
        if !is_master {
            return Err(PoolError::NotMaster(tag.to_string()).into());
        }

        let failed = self
            .comm
            .broadcast(&others, &Message::Terminate { tag: tag.to_string() })
            .await;
        if !failed.is_empty() {
            warn!(node = %me, tag, failed = ?failed, "terminate not delivered to every member");
        }
        info!(node = %me, tag, "pool terminated");
        self.request_shutdown();
        Ok(())
    }

    /// Ask one random member of `tag` for work matching `profile`.
    ///
    /// `Ok(None)` when there is nobody to ask, the victim had nothing, or the
    /// reply did not come back in time (a late reply is adopted locally).
    pub async fn steal(
        &self,
        tag: &str,
        profile: ExecutorProfile,
        accepts: Vec<String>,
    ) -> Result<Option<ActivityEnvelope>, CommError> {
        let Some(pool) = self.pool(tag) else {
            return Ok(None);
        };
        let me = self.my_identifier().clone();
        let victim = {
            let info = lock(&pool);
            if info.is_dummy() {
                None
            } else {
                let mut rng = rand::thread_rng();
                info.select_random_excluding(&me, &mut rng).cloned()
            }
        };
        let Some(victim) = victim else {
            return Ok(None);
        };

        let request_id = self.ids.generate_request_id();
        let (tx, rx) = oneshot::channel();
        lock(&self.pending_steals).insert(request_id, tx);
        let request = Message::StealRequest {
            request_id,
            tag: tag.to_string(),
            profile,
            accepts,
        };
        if let Err(e) = self.comm.try_send(&victim, &request).await {
            lock(&self.pending_steals).remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(self.steal_timeout, rx).await {
            Ok(Ok(activity)) => Ok(activity),
            Ok(Err(_)) => Ok(None),
            Err(_) => {
                lock(&self.pending_steals).remove(&request_id);
                debug!(node = %me, victim = %victim, request = %request_id, "steal request timed out");
                Ok(None)
            }
        }
    }

    /// Ask peers for the winner of `tag` and wait up to `timeout`.
    pub async fn get_election_result(&self, tag: &str, timeout: Duration) -> Option<NodeId> {
        if let Some(winner) = self.comm.cached_election(tag) {
            return Some(winner);
        }
        let me = self.my_identifier().clone();
        let query = Message::Elect {
            tag: tag.to_string(),
            winner: None,
        };
        for peer in self.comm.node_identifiers().iter().filter(|p| **p != me) {
            self.comm.send_message(peer, &query).await;
        }
        self.comm.get_election_result(tag, timeout).await
    }

    pub async fn forward_event(&self, dest: &NodeId, event: Event) -> Result<(), CommError> {
        self.comm.try_send(dest, &Message::Event { event }).await
    }

    /// Send what the scheduler could not handle locally. Failures are logged.
    pub async fn deliver_outbound(&self, outbound: Outbound) {
        let me = self.my_identifier();
        match outbound {
            Outbound::Event { dest, event } => {
                let target = event.target.clone();
                if let Err(e) = self.forward_event(&dest, event).await {
                    warn!(node = %me, to = %dest, target = %target, error = %e, "event forwarding failed");
                }
            }
            Outbound::Retired { dest, activity, at } => {
                let notice = Message::Retired {
                    activity: activity.clone(),
                    at,
                };
                if !self.comm.send_message(&dest, &notice).await {
                    debug!(node = %me, to = %dest, activity = %activity, "retired notice undeliverable");
                }
            }
        }
    }

    async fn on_join_request(&self, tag: String, node: NodeId, executors: Vec<ExecutorProfile>) {
        let me = self.my_identifier().clone();
        let pool = {
            let mut pending = lock(&self.pending_joins);
            match self.pool(&tag) {
                Some(pool) => pool,
                None if self.comm.cached_election(&tag).is_some_and(|w| w != me) => {
                    warn!(node = %me, tag, joiner = %node, "join request for a pool this node does not lead");
                    return;
                }
                None => {
                    debug!(node = %me, tag, joiner = %node, "join request arrived before the pool, buffering it");
                    pending.entry(tag).or_default().push((node, executors));
                    return;
                }
            }
        };
        lock(&self.directory).insert(node.clone(), executors);

        let admitted = {
            let mut info = lock(&pool);
            if !info.is_master() {
                warn!(node = %me, tag, joiner = %node, "join request sent to a non-master");
                None
            } else {
                match info.add_member(node.clone()) {
                    Ok(()) => {
                        let rank = info.allocate_rank();
                        Some((rank, info.snapshot(self.profiles_for(info.members()))))
                    }
                    Err(e) => {
                        error!(node = %me, error = %e, "rejecting join request");
                        None
                    }
                }
            }
        };
        let Some((rank, snapshot)) = admitted else {
            return;
        };
        self.apply_local_view(&snapshot);

        let reply = Message::JoinReply {
            rank,
            snapshot: snapshot.clone(),
        };
        if !self.comm.send_message(&node, &reply).await {
            warn!(node = %me, tag, joiner = %node, "join reply undeliverable, removing member");
            let snapshot = {
                let mut info = lock(&pool);
                lock(&self.directory).remove(&node);
                info.remove_member(&node);
                info.snapshot(self.profiles_for(info.members()))
            };
            self.apply_local_view(&snapshot);
            self.broadcast_snapshot(&snapshot, None).await;
            return;
        }

        self.broadcast_snapshot(&snapshot, Some(&node)).await;
        info!(
            node = %me,
            tag,
            joiner = %node,
            rank,
            members = snapshot.members.len(),
            timestamp = snapshot.timestamp,
            "member joined"
        );
    }

    fn on_join_reply(&self, rank: u32, snapshot: PoolSnapshot) {
        let me = self.my_identifier().clone();
        let tag = snapshot.tag.clone();
        let Some(pool) = self.pool(&tag) else {
            warn!(node = %me, tag, "join reply for a pool this node is not joining");
            return;
        };
        let applied = lock(&pool).apply_snapshot(&snapshot);
        write(&self.ranks)
            .entry(tag.clone())
            .or_insert_with(|| RankInfo::new(rank, me.clone()));
        self.comm.set_rank(rank);
        if let Some(master) = &snapshot.master {
            self.comm.record_election(&tag, master.clone());
        }
        if applied {
            self.apply_local_view(&snapshot);
        }
        info!(node = %me, tag, rank, members = snapshot.members.len(), "joined pool");
    }

    fn on_snapshot(&self, snapshot: PoolSnapshot) {
        let Some(pool) = self.pool(&snapshot.tag) else {
            debug!(node = %self.my_identifier(), tag = %snapshot.tag, "snapshot for unknown pool ignored");
            return;
        };
        if lock(&pool).apply_snapshot(&snapshot) {
            self.apply_local_view(&snapshot);
            debug!(node = %self.my_identifier(), tag = %snapshot.tag, timestamp = snapshot.timestamp, "membership updated");
        }
    }

    async fn on_leave(&self, tag: String, node: NodeId) {
        let me = self.my_identifier().clone();
        let Some(pool) = self.pool(&tag) else {
            debug!(node = %me, tag, leaver = %node, "leave for unknown pool ignored");
            return;
        };
        let outcome = {
            let mut info = lock(&pool);
            if !info.is_master() && info.master() == Some(&node) {
                LeaveOutcome::Dissolved
            } else if info.is_master() && info.contains(&node) {
                lock(&self.directory).remove(&node);
                info.remove_member(&node);
                LeaveOutcome::Removed(info.snapshot(self.profiles_for(info.members())))
            } else {
                LeaveOutcome::Ignored
            }
        };

        match outcome {
            LeaveOutcome::Dissolved => {
                write(&self.pools).remove(&tag);
                write(&self.ranks).remove(&tag);
                self.comm.clear_view();
                self.scheduler.update_remote_profiles(&[]);
                info!(node = %me, tag, master = %node, "master left, pool dissolved");
            }
            LeaveOutcome::Removed(snapshot) => {
                self.scheduler.forget_node(&node);
                self.comm.cleanup_node(&node).await;
                self.apply_local_view(&snapshot);
                self.broadcast_snapshot(&snapshot, None).await;
                info!(node = %me, tag, leaver = %node, members = snapshot.members.len(), "member left");
            }
            LeaveOutcome::Ignored => {
                debug!(node = %me, tag, leaver = %node, "leave ignored");
            }
        }
    }

    async fn on_elect(&self, source: NodeId, tag: String, winner: Option<NodeId>) {
        match winner {
            Some(winner) => {
                self.comm.record_election(&tag, winner);
            }
            None => {
                if let Some(winner) = self.comm.cached_election(&tag) {
                    let answer = Message::Elect {
                        tag,
                        winner: Some(winner),
                    };
                    self.comm.send_message(&source, &answer).await;
                }
            }
        }
    }

    fn on_terminate(&self, source: NodeId, tag: String) {
        let me = self.my_identifier();
        let from_master = self
            .pool(&tag)
            .is_some_and(|pool| lock(&pool).master() == Some(&source));
        if !from_master {
            warn!(node = %me, tag, from = %source, "terminate from a node that is not our master ignored");
            return;
        }
        info!(node = %me, tag, master = %source, "pool terminated by master");
        self.request_shutdown();
    }

    async fn on_retired(&self, activity: ActivityId, at: NodeId) {
        let Some(next) = self.scheduler.retire(&activity, &at) else {
            return;
        };
        let notice = Message::Retired {
            activity: activity.clone(),
            at,
        };
        if !self.comm.send_message(&next, &notice).await {
            debug!(node = %self.my_identifier(), to = %next, activity = %activity, "retired notice undeliverable");
        }
    }

    async fn on_steal_request(
        &self,
        source: NodeId,
        request_id: RequestId,
        tag: String,
        profile: ExecutorProfile,
        accepts: Vec<String>,
    ) {
        let activity = if self.pool(&tag).is_some() {
            self.scheduler.take_for_remote(&source, &profile, &accepts)
        } else {
            None
        };
        let reply = Message::StealReply {
            request_id,
            activity,
        };
        if !self.comm.send_message(&source, &reply).await
            && let Message::StealReply {
                activity: Some(envelope),
                ..
            } = reply
        {
            warn!(node = %self.my_identifier(), thief = %source, activity = %envelope.id, "steal reply undeliverable");
            self.scheduler.restore(envelope);
        }
    }

    fn on_steal_reply(
        &self,
        source: NodeId,
        request_id: RequestId,
        activity: Option<ActivityEnvelope>,
    ) {
        let waiter = lock(&self.pending_steals).remove(&request_id);
        let unclaimed = match waiter {
            Some(waiter) => waiter.send(activity).err().flatten(),
            None => activity,
        };
        if let Some(envelope) = unclaimed {
            let id = envelope.id.clone();
            match self.scheduler.adopt_queued(envelope) {
                Ok(_) => info!(node = %self.my_identifier(), victim = %source, activity = %id, "late steal reply adopted"),
                Err(e) => warn!(node = %self.my_identifier(), victim = %source, activity = %id, error = %e, "late steal reply lost"),
            }
        }
    }
}

#[async_trait]
impl MessageHandler for PoolCoordinator {
    async fn on_message(&self, source: NodeId, message: Message) {
        match message {
            Message::JoinRequest {
                tag,
                node,
                executors,
            } => self.on_join_request(tag, node, executors).await,
            Message::JoinReply { rank, snapshot } => self.on_join_reply(rank, snapshot),
            Message::PoolSnapshot { snapshot } => self.on_snapshot(snapshot),
            Message::Leave { tag, node } => self.on_leave(tag, node).await,
            Message::Elect { tag, winner } => self.on_elect(source, tag, winner).await,
            Message::Terminate { tag } => self.on_terminate(source, tag),
            Message::StealRequest {
                request_id,
                tag,
                profile,
                accepts,
            } => {
                self.on_steal_request(source, request_id, tag, profile, accepts)
                    .await
            }
            Message::StealReply {
                request_id,
                activity,
            } => self.on_steal_reply(source, request_id, activity),
            Message::Event { event } => self.scheduler.send_event(event),
            Message::Retired { activity, at } => self.on_retired(activity, at).await,
        }
    }
}
