//! Activity trait - 型付きアクティビティの定義
//!
//! # 学習ポイント
//! - Associated Constants (`const TYPE`) でデコーダを引く
//! - Serialize + DeserializeOwned: fresh なアクティビティを他ノードへ送るため
//! - ライフサイクルメソッドは同期。ActivityCx 経由で子の submit やイベント送信を行う

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::app::scheduler::Scheduler;
use crate::domain::{ActivityContext, ActivityId, Event, ExecutorId, Step};
use crate::error::{ActivityError, SubmitError};

/// A unit of work with a context requirement and an explicit lifecycle.
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Leaf { context: ActivityContext }
///
/// impl Activity for Leaf {
///     const TYPE: &'static str = "demo.leaf.v1";
///
///     fn context(&self) -> ActivityContext {
///         self.context.clone()
///     }
///
///     fn initialize(&mut self, _cx: &ActivityCx<'_>) -> Result<Step, ActivityError> {
///         Ok(Step::Finish)
///     }
/// }
/// ```
pub trait Activity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// `{namespace}.{name}.v{major}`
    const TYPE: &'static str;

    fn context(&self) -> ActivityContext;

    /// `false` pins the activity to the node it was submitted on.
    fn may_be_stolen(&self) -> bool {
        true
    }

    /// `false` means the activity never suspends.
    fn expects_events(&self) -> bool {
        true
    }

    /// Runs once, when the activity is first scheduled.
    fn initialize(&mut self, cx: &ActivityCx<'_>) -> Result<Step, ActivityError>;

    /// Runs once per delivered event, never concurrently with another call on the same activity.
    fn process(&mut self, cx: &ActivityCx<'_>, event: Event) -> Result<Step, ActivityError> {
        let _ = cx;
        Err(ActivityError::new(format!(
            "{} does not handle events (got one for {})",
            Self::TYPE,
            event.target
        )))
    }

    /// Runs exactly once after `Finish`.
    fn cleanup(&mut self, cx: &ActivityCx<'_>) {
        let _ = cx;
    }
}

/// Handle given to lifecycle methods.
pub struct ActivityCx<'a> {
    scheduler: &'a Scheduler,
    identifier: &'a ActivityId,
    parent: Option<&'a ActivityId>,
    executor: ExecutorId,
}

impl<'a> ActivityCx<'a> {
    pub(crate) fn new(
        scheduler: &'a Scheduler,
        identifier: &'a ActivityId,
        parent: Option<&'a ActivityId>,
        executor: ExecutorId,
    ) -> Self {
        Self {
            scheduler,
            identifier,
            parent,
            executor,
        }
    }

    pub fn identifier(&self) -> &ActivityId {
        self.identifier
    }

    pub fn parent(&self) -> Option<&ActivityId> {
        self.parent
    }

    /// Executor running the current step.
    pub fn executor(&self) -> ExecutorId {
        self.executor
    }

    /// Submit a child of the current activity.
    pub fn submit<A: Activity>(&self, activity: A) -> Result<ActivityId, SubmitError> {
        self.scheduler
            .submit(activity, Some(self.identifier.clone()))
    }

    /// Fire-and-forget event to `target`.
    pub fn send<T: Serialize>(&self, target: &ActivityId, data: &T) -> Result<(), ActivityError> {
        let data = serde_json::to_value(data)?;
        self.scheduler.send_event(Event::new(
            Some(self.identifier.clone()),
            target.clone(),
            data,
        ));
        Ok(())
    }

    /// Send to the parent, if there is one. Returns whether an event was sent.
    pub fn send_to_parent<T: Serialize>(&self, data: &T) -> Result<bool, ActivityError> {
        match self.parent {
            Some(parent) => self.send(parent, data).map(|()| true),
            None => Ok(false),
        }
    }
}
