//! Scheduler - ノード内のアクティビティ管理とワークスティーリング
//!
//! # 構成
//! - **arena**: `DashMap<ActivityId, ActivitySlot>`。このノードが持つ全アクティビティ
//! - **executor ごとのキュー**: fresh（未 initialize）と wakeups（イベントで起きたもの）
//! - **relocatable**: ローカルの submit 先が無く、兄弟 executor か他ノードが盗むのを待つもの
//! - **relocated**: 他ノードへ移ったアクティビティの転送先
//!
//! # ロック順序
//! arena のエントリ参照を持ったままキューの Mutex を取らない（逆も同じ）。
//! アクティビティのコードを実行している間は何のロックも持たない。
//!
//! # 取り出し順
//! - 所有 executor: 最新のもの（LIFO）
//! - 盗む側: 最古のもの（FIFO）
//! - `Biggest` / `Smallest` は rank 最大／最小を選ぶ
//!
//! 盗めるのは fresh なアクティビティだけです。一度 initialize したものは
//! その executor から動きません。
//!
//! # 転送表の掃除
//! 他ノードで終わったアクティビティは origin へ `Retired` を送り、
//! 転送表の鎖を origin から順にたどって消します。
//! 戻ってきたアクティビティも、前の転送先へ同じ通知を送ります。

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use dashmap::DashMap;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, info, warn};

use super::config::{ExecutorConfig, FailurePolicy};
use super::status::{Counters, NodeStats};
use crate::domain::{
    ActivityContext, ActivityEnvelope, ActivityId, ActivityState, Event, ExecutorContext,
    ExecutorId, ExecutorProfile, MemberProfile, NodeId, StealStrategy, Step, satisfied,
};
use crate::error::{ActivityError, SubmitError};
use crate::ports::IdGenerator;
use crate::sync::{lock, read, write};
use crate::typed::{Activity, ActivityCx, ActivityRegistry, DynActivity, RegistryError, TypedActivity};

/// Traffic that has to leave this node.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Event { dest: NodeId, event: Event },
    /// `activity` finished (or came back) at `at`; `dest` can drop its forwarding entry.
    Retired {
        dest: NodeId,
        activity: ActivityId,
        at: NodeId,
    },
}

pub(crate) enum Route {
    Local,
    Remote(NodeId, Event),
    Dropped(Event),
}

#[derive(Debug, Clone)]
struct Queued {
    id: ActivityId,
    context: ActivityContext,
    activity_type: &'static str,
    stealable: bool,
}

#[derive(Default)]
struct ExecutorQueue {
    fresh: VecDeque<Queued>,
    wakeups: VecDeque<ActivityId>,
}

struct ExecutorSlot {
    id: ExecutorId,
    config: ExecutorConfig,
    queue: Mutex<ExecutorQueue>,
}

struct ActivitySlot {
    parent: Option<ActivityId>,
    context: ActivityContext,
    state: ActivityState,
    /// `None` while a step is running.
    instance: Option<Box<dyn DynActivity>>,
    mailbox: VecDeque<Event>,
    /// Executor that ran (or will run) it last; wakeups go there.
    owner: usize,
    /// Sitting in a fresh or wakeup queue.
    queued: bool,
}

enum Placement {
    Executor(usize),
    Relocatable,
}

#[derive(Clone, Copy)]
enum Pick {
    Newest,
    Oldest,
}

enum Phase {
    Initialize,
    Process(Event),
}

pub struct Scheduler {
    node: NodeId,
    ids: Arc<dyn IdGenerator>,
    registry: Arc<ActivityRegistry>,
    executors: Vec<ExecutorSlot>,
    activities: DashMap<ActivityId, ActivitySlot>,
    relocated: DashMap<ActivityId, NodeId>,
    relocatable: Mutex<VecDeque<Queued>>,
    remote_profiles: RwLock<HashMap<NodeId, Vec<ExecutorProfile>>>,
    outbound: mpsc::UnboundedSender<Outbound>,
    failure_policy: FailurePolicy,
    next_placement: AtomicUsize,
    work_available: Notify,
    counters: Counters,
}

impl Scheduler {
    /// Returns the scheduler and the stream of events it cannot deliver locally.
    pub fn new(
        node: NodeId,
        ids: Arc<dyn IdGenerator>,
        registry: Arc<ActivityRegistry>,
        executors: Vec<ExecutorConfig>,
        failure_policy: FailurePolicy,
    ) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let executors = executors
            .into_iter()
            .map(|config| ExecutorSlot {
                id: ids.generate_executor_id(),
                config,
                queue: Mutex::new(ExecutorQueue::default()),
            })
            .collect();
        let scheduler = Self {
            node,
            ids,
            registry,
            executors,
            activities: DashMap::new(),
            relocated: DashMap::new(),
            relocatable: Mutex::new(VecDeque::new()),
            remote_profiles: RwLock::new(HashMap::new()),
            outbound,
            failure_policy,
            next_placement: AtomicUsize::new(0),
            work_available: Notify::new(),
            counters: Counters::default(),
        };
        (scheduler, outbound_rx)
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    pub fn executor_count(&self) -> usize {
        self.executors.len()
    }

    pub fn executor_id(&self, executor: usize) -> Option<ExecutorId> {
        self.executors.get(executor).map(|e| e.id)
    }

    pub fn executor_profile(&self, executor: usize) -> Option<ExecutorProfile> {
        self.executors.get(executor).map(|e| e.config.profile())
    }

    pub fn local_profiles(&self) -> Vec<ExecutorProfile> {
        self.executors.iter().map(|e| e.config.profile()).collect()
    }

    /// Activity types this node can decode, offered in steal requests.
    pub fn accepted_types(&self) -> Vec<String> {
        self.registry.registered_types()
    }

    pub fn update_remote_profiles(&self, profiles: &[MemberProfile]) {
        let mut remote = write(&self.remote_profiles);
        remote.clear();
        for member in profiles.iter().filter(|m| m.node != self.node) {
            remote.insert(member.node.clone(), member.executors.clone());
        }
    }

    pub fn forget_node(&self, node: &NodeId) {
        write(&self.remote_profiles).remove(node);
    }

    pub(crate) fn work_available(&self) -> &Notify {
        &self.work_available
    }

    pub fn state_of(&self, id: &ActivityId) -> Option<ActivityState> {
        self.activities.get(id).map(|slot| slot.state)
    }

    pub fn relocated_to(&self, id: &ActivityId) -> Option<NodeId> {
        self.relocated.get(id).map(|entry| entry.value().clone())
    }

    pub fn submit<A: Activity>(
        &self,
        activity: A,
        parent: Option<ActivityId>,
    ) -> Result<ActivityId, SubmitError> {
        self.submit_dyn(TypedActivity::boxed(activity), parent)
    }

    pub fn submit_dyn(
        &self,
        instance: Box<dyn DynActivity>,
        parent: Option<ActivityId>,
    ) -> Result<ActivityId, SubmitError> {
        let context = instance.context();
        let stealable = instance.may_be_stolen();
        let placement = self.place(&context, stealable)?;
        let id = self.ids.generate_activity_id(&self.node);
        let queued = Queued {
            id: id.clone(),
            context: context.clone(),
            activity_type: instance.activity_type(),
            stealable,
        };
        let owner = match placement {
            Placement::Executor(index) => index,
            Placement::Relocatable => 0,
        };

        self.activities.insert(
            id.clone(),
            ActivitySlot {
                parent,
                context,
                state: ActivityState::Initialize,
                instance: Some(instance),
                mailbox: VecDeque::new(),
                owner,
                queued: true,
            },
        );
        self.enqueue(queued, &placement);
        Counters::bump(&self.counters.submitted);
        debug!(
            node = %self.node,
            activity = %id,
            relocatable = matches!(placement, Placement::Relocatable),
            "activity submitted"
        );
        Ok(id)
    }

    fn place(&self, context: &ActivityContext, stealable: bool) -> Result<Placement, SubmitError> {
        let candidates: Vec<usize> = self
            .executors
            .iter()
            .enumerate()
            .filter(|(_, e)| satisfied(context, &e.config.context, &e.config.submit_strategy))
            .map(|(index, _)| index)
            .collect();
        if !candidates.is_empty() {
            let turn = self.next_placement.fetch_add(1, Ordering::Relaxed);
            return Ok(Placement::Executor(candidates[turn % candidates.len()]));
        }

        let local_thief = self
            .executors
            .iter()
            .any(|e| satisfied(context, &e.config.context, &e.config.steal_strategy));
        let remote_thief = stealable
            && read(&self.remote_profiles)
                .values()
                .flatten()
                .any(|profile| profile.can_run(context));
        if local_thief || remote_thief {
            Ok(Placement::Relocatable)
        } else {
            Err(SubmitError::NoSuitableExecutor(context.clone()))
        }
    }

    fn enqueue(&self, queued: Queued, placement: &Placement) {
        match placement {
            Placement::Executor(index) => lock(&self.executors[*index].queue).fresh.push_back(queued),
            Placement::Relocatable => lock(&self.relocatable).push_back(queued),
        }
        self.work_available.notify_waiters();
    }

    /// Next activity for `executor` from its own queues: wakeups first, then the newest fresh one.
    pub(crate) fn next_local(&self, executor: usize) -> Option<ActivityId> {
        let slot = self.executors.get(executor)?;
        let mut queue = lock(&slot.queue);
        if let Some(id) = queue.wakeups.pop_front() {
            return Some(id);
        }
        take_matching(
            &mut queue.fresh,
            &slot.config.context,
            &slot.config.submit_strategy,
            Pick::Newest,
            |_| true,
        )
        .map(|queued| queued.id)
    }

    /// Oldest matching fresh activity from a sibling executor or the relocatable queue.
    pub(crate) fn steal_local(&self, executor: usize) -> Option<ActivityId> {
        let thief = &self.executors.get(executor)?.config;
        let n = self.executors.len();
        for offset in 1..n {
            let victim = (executor + offset) % n;
            let taken = take_matching(
                &mut lock(&self.executors[victim].queue).fresh,
                &thief.context,
                &thief.steal_strategy,
                Pick::Oldest,
                |_| true,
            );
            if let Some(queued) = taken {
                Counters::bump(&self.counters.stolen_local);
                debug!(node = %self.node, activity = %queued.id, thief = executor, victim, "stolen from sibling");
                return Some(queued.id);
            }
        }
        take_matching(
            &mut lock(&self.relocatable),
            &thief.context,
            &thief.steal_strategy,
            Pick::Oldest,
            |_| true,
        )
        .map(|queued| queued.id)
    }

    /// Serve a remote steal request: detach one fresh activity for `thief`.
    ///
    /// The forwarding entry is in place before the activity leaves the arena,
    /// so an event is either in the envelope or forwarded.
    pub(crate) fn take_for_remote(
        &self,
        thief: &NodeId,
        profile: &ExecutorProfile,
        accepts: &[String],
    ) -> Option<ActivityEnvelope> {
        let eligible = |q: &Queued| q.stealable && accepts.iter().any(|t| t == q.activity_type);
        let queued = take_matching(
            &mut lock(&self.relocatable),
            &profile.context,
            &profile.steal_strategy,
            Pick::Oldest,
            eligible,
        )
        .or_else(|| {
            self.executors.iter().find_map(|e| {
                take_matching(
                    &mut lock(&e.queue).fresh,
                    &profile.context,
                    &profile.steal_strategy,
                    Pick::Oldest,
                    eligible,
                )
            })
        })?;

        self.relocated.insert(queued.id.clone(), thief.clone());
        let Some((id, slot)) = self.activities.remove(&queued.id) else {
            self.relocated.remove(&queued.id);
            warn!(node = %self.node, activity = %queued.id, "queued activity missing from arena");
            return None;
        };

        let payload = match slot.instance.as_ref().map(|instance| instance.encode()) {
            Some(Ok(payload)) => payload,
            other => {
                let error = other.and_then(Result::err).map(|e| e.to_string());
                warn!(node = %self.node, activity = %id, error = ?error, "cannot relocate activity, keeping it");
                self.relocated.remove(&id);
                let owner = slot.owner;
                self.activities.insert(id, slot);
                self.requeue(queued, owner);
                return None;
            }
        };

        Counters::bump(&self.counters.served_remote);
        info!(node = %self.node, activity = %id, thief = %thief, "activity relocated");
        Some(ActivityEnvelope {
            id,
            parent: slot.parent,
            context: slot.context,
            activity_type: queued.activity_type.to_string(),
            payload,
            pending_events: slot.mailbox.into(),
        })
    }

    fn requeue(&self, queued: Queued, owner: usize) {
        let own = self
            .executors
            .get(owner)
            .filter(|e| satisfied(&queued.context, &e.config.context, &e.config.submit_strategy))
            .is_some();
        let placement = if own {
            Placement::Executor(owner)
        } else {
            Placement::Relocatable
        };
        self.enqueue(queued, &placement);
    }

    /// Take back an activity whose STEAL_REPLY could not be delivered.
    pub(crate) fn restore(&self, envelope: ActivityEnvelope) {
        let id = envelope.id.clone();
        match self.install_queued(envelope, false) {
            Ok(_) => info!(node = %self.node, activity = %id, "activity restored after failed hand-off"),
            Err(e) => warn!(node = %self.node, activity = %id, error = %e, "activity lost while restoring"),
        }
    }

    /// Install a stolen activity for `executor`, which runs it next.
    pub(crate) fn adopt(
        &self,
        envelope: ActivityEnvelope,
        executor: usize,
    ) -> Result<ActivityId, RegistryError> {
        let (queued, slot) = self.slot_from_envelope(envelope, executor)?;
        self.activities.insert(queued.id.clone(), slot);
        self.settle(&queued.id, true);
        Counters::bump(&self.counters.stolen_remote);
        debug!(node = %self.node, activity = %queued.id, executor, "adopted stolen activity");
        Ok(queued.id)
    }

    /// Install an activity that arrived without a waiting executor (late reply).
    pub(crate) fn adopt_queued(&self, envelope: ActivityEnvelope) -> Result<ActivityId, RegistryError> {
        self.install_queued(envelope, true)
    }

    fn install_queued(
        &self,
        envelope: ActivityEnvelope,
        notify_previous: bool,
    ) -> Result<ActivityId, RegistryError> {
        let placement = self
            .place(&envelope.context, true)
            .unwrap_or(Placement::Relocatable);
        let owner = match placement {
            Placement::Executor(index) => index,
            Placement::Relocatable => 0,
        };
        let (queued, mut slot) = self.slot_from_envelope(envelope, owner)?;
        slot.queued = true;
        let id = queued.id.clone();
        self.activities.insert(id.clone(), slot);
        self.settle(&id, notify_previous);
        self.enqueue(queued, &placement);
        Ok(id)
    }

    /// Drop the forwarding entry of an activity that is back in the arena.
    ///
    /// Called after the arena insert so routing always finds one of the two.
    fn settle(&self, id: &ActivityId, notify_previous: bool) {
        let Some((_, previous)) = self.relocated.remove(id) else {
            return;
        };
        if notify_previous && previous != self.node {
            self.send_outbound(Outbound::Retired {
                dest: previous,
                activity: id.clone(),
                at: self.node.clone(),
            });
        }
    }

    /// Handle a `Retired` notice: drop the entry for `id` and return the
    /// next hop that still needs the notice, if any.
    pub(crate) fn retire(&self, id: &ActivityId, at: &NodeId) -> Option<NodeId> {
        let (_, next) = self.relocated.remove(id)?;
        debug!(node = %self.node, activity = %id, at = %at, "forwarding entry dropped");
        (next != *at && next != self.node).then_some(next)
    }

    fn slot_from_envelope(
        &self,
        envelope: ActivityEnvelope,
        owner: usize,
    ) -> Result<(Queued, ActivitySlot), RegistryError> {
        let instance = self
            .registry
            .decode(&envelope.activity_type, envelope.payload)?;
        let queued = Queued {
            id: envelope.id,
            context: envelope.context.clone(),
            activity_type: instance.activity_type(),
            stealable: instance.may_be_stolen(),
        };
        let slot = ActivitySlot {
            parent: envelope.parent,
            context: envelope.context,
            state: ActivityState::Initialize,
            instance: Some(instance),
            mailbox: envelope.pending_events.into(),
            owner,
            queued: false,
        };
        Ok((queued, slot))
    }

    /// Run one step of `id` on `executor`: `initialize` for a fresh activity,
    /// `process` with one mailbox event otherwise.
    pub(crate) fn run(&self, executor: usize, id: &ActivityId) {
        let Some(executor_id) = self.executor_id(executor) else {
            return;
        };
        let Some((mut instance, parent, phase)) = self.begin_step(executor, id) else {
            return;
        };
        let cx = ActivityCx::new(self, id, parent.as_ref(), executor_id);

        let result = catch_unwind(AssertUnwindSafe(|| match phase {
            Phase::Initialize => instance.initialize(&cx),
            Phase::Process(event) => instance.process(&cx, event),
        }))
        .unwrap_or_else(|panic| {
            Err(ActivityError::new(format!(
                "panicked: {}",
                panic_message(panic.as_ref())
            )))
        });

        match result {
            Ok(Step::Suspend) if instance.expects_events() => self.suspend(id, instance),
            Ok(Step::Suspend) => {
                warn!(node = %self.node, activity = %id, "suspended without expecting events, finishing it");
                self.finish(id, instance, &cx, None);
            }
            Ok(Step::Finish) => self.finish(id, instance, &cx, None),
            Err(error) => {
                warn!(node = %self.node, activity = %id, error = %error, "activity failed");
                self.finish(id, instance, &cx, Some(error));
            }
        }
    }

    fn begin_step(
        &self,
        executor: usize,
        id: &ActivityId,
    ) -> Option<(Box<dyn DynActivity>, Option<ActivityId>, Phase)> {
        let mut slot = self.activities.get_mut(id)?;
        slot.queued = false;
        if slot.instance.is_none() {
            return None;
        }
        let phase = match slot.state {
            ActivityState::Initialize => Phase::Initialize,
            ActivityState::Suspend => {
                let event = slot.mailbox.pop_front()?;
                slot.state = ActivityState::Process;
                Phase::Process(event)
            }
            ActivityState::Process | ActivityState::Finish => return None,
        };
        let instance = slot.instance.take()?;
        slot.owner = executor;
        Some((instance, slot.parent.clone(), phase))
    }

    fn suspend(&self, id: &ActivityId, instance: Box<dyn DynActivity>) {
        let wake = {
            let Some(mut slot) = self.activities.get_mut(id) else {
                return;
            };
            slot.instance = Some(instance);
            slot.state = ActivityState::Suspend;
            if !slot.mailbox.is_empty() && !slot.queued {
                slot.queued = true;
                Some(slot.owner)
            } else {
                None
            }
        };
        if let Some(owner) = wake {
            self.push_wakeup(owner, id.clone());
        }
    }

    fn finish(
        &self,
        id: &ActivityId,
        mut instance: Box<dyn DynActivity>,
        cx: &ActivityCx<'_>,
        error: Option<ActivityError>,
    ) {
        if let Some(mut slot) = self.activities.get_mut(id) {
            slot.state = ActivityState::Finish;
        }
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| instance.cleanup(cx))) {
            warn!(node = %self.node, activity = %id, panic = %panic_message(panic.as_ref()), "cleanup panicked");
        }

        if let Some(error) = error {
            Counters::bump(&self.counters.failed);
            if let (FailurePolicy::NotifyParent, Some(parent)) = (self.failure_policy, cx.parent()) {
                self.send_event(Event::failure(Some(id.clone()), parent.clone(), error.0));
            }
        }

        if let Some((_, slot)) = self.activities.remove(id)
            && !slot.mailbox.is_empty()
        {
            for _ in 0..slot.mailbox.len() {
                Counters::bump(&self.counters.dropped_events);
            }
            warn!(node = %self.node, activity = %id, dropped = slot.mailbox.len(), "finished with undelivered events");
        }
        if id.origin() != &self.node {
            self.send_outbound(Outbound::Retired {
                dest: id.origin().clone(),
                activity: id.clone(),
                at: self.node.clone(),
            });
        }
        Counters::bump(&self.counters.finished);
        debug!(node = %self.node, activity = %id, "activity finished");
    }

    fn push_wakeup(&self, owner: usize, id: ActivityId) {
        if let Some(executor) = self.executors.get(owner) {
            lock(&executor.queue).wakeups.push_back(id);
            self.work_available.notify_waiters();
        }
    }

    /// Deliver `event`, forwarding it when its target lives elsewhere.
    pub fn send_event(&self, event: Event) {
        match self.route(event) {
            Route::Local => {}
            Route::Remote(dest, event) => {
                Counters::bump(&self.counters.forwarded_events);
                self.send_outbound(Outbound::Event { dest, event });
            }
            Route::Dropped(event) => {
                Counters::bump(&self.counters.dropped_events);
                warn!(node = %self.node, target = %event.target, "no route for event, dropping it");
            }
        }
    }

    fn send_outbound(&self, outbound: Outbound) {
        let is_event = matches!(outbound, Outbound::Event { .. });
        if self.outbound.send(outbound).is_err() {
            if is_event {
                Counters::bump(&self.counters.dropped_events);
            }
            warn!(node = %self.node, "outbound channel closed, message lost");
        }
    }

    /// Local arena first, then the forwarding table, then the target's origin.
    pub(crate) fn route(&self, event: Event) -> Route {
        let event = match self.deliver_local(event) {
            Ok(()) => return Route::Local,
            Err(event) => event,
        };
        if let Some(dest) = self.relocated_to(&event.target) {
            return Route::Remote(dest, event);
        }
        if event.target.origin() != &self.node {
            let origin = event.target.origin().clone();
            return Route::Remote(origin, event);
        }
        Route::Dropped(event)
    }

    fn deliver_local(&self, event: Event) -> Result<(), Event> {
        let target = event.target.clone();
        let wake = {
            let Some(mut slot) = self.activities.get_mut(&target) else {
                return Err(event);
            };
            if slot.state.is_terminal() {
                drop(slot);
                Counters::bump(&self.counters.dropped_events);
                debug!(node = %self.node, target = %target, "event for finished activity dropped");
                return Ok(());
            }
            slot.mailbox.push_back(event);
            if slot.state == ActivityState::Suspend && slot.instance.is_some() && !slot.queued {
                slot.queued = true;
                Some(slot.owner)
            } else {
                None
            }
        };
        if let Some(owner) = wake {
            self.push_wakeup(owner, target);
        }
        Ok(())
    }

    pub fn stats(&self) -> NodeStats {
        let mut stats = NodeStats::default();
        for executor in &self.executors {
            let queue = lock(&executor.queue);
            stats.ready += queue.fresh.len() + queue.wakeups.len();
        }
        stats.ready += lock(&self.relocatable).len();
        stats.live = self.activities.len();
        stats.suspended = self
            .activities
            .iter()
            .filter(|slot| slot.state == ActivityState::Suspend)
            .count();
        stats.relocated = self.relocated.len();
        self.counters.fill(&mut stats);
        stats
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn take_matching(
    queue: &mut VecDeque<Queued>,
    offered: &ExecutorContext,
    strategy: &StealStrategy,
    pick: Pick,
    eligible: impl Fn(&Queued) -> bool,
) -> Option<Queued> {
    let mut candidates = queue
        .iter()
        .enumerate()
        .filter(|(_, q)| eligible(q) && satisfied(&q.context, offered, strategy));
    let index = match (strategy, pick) {
        (StealStrategy::Biggest, _) => candidates.max_by_key(|(_, q)| q.context.rank()),
        (StealStrategy::Smallest, _) => candidates.min_by_key(|(_, q)| q.context.rank()),
        (_, Pick::Newest) => candidates.last(),
        (_, Pick::Oldest) => candidates.next(),
    }
    .map(|(index, _)| index)?;
    queue.remove(index)
}
