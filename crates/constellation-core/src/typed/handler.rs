//! DynActivity - 型消去されたアクティビティ
//!
//! # 学習ポイント
//! - ジェネリック trait (Activity) を object-safe な DynActivity に変換
//! - Type erasure パターン (TypedActivity<A> → Box<dyn DynActivity>)

use super::activity::{Activity, ActivityCx};
use crate::domain::{ActivityContext, Event, Step};
use crate::error::ActivityError;

/// Object-safe view of an [`Activity`], as stored by the scheduler.
pub trait DynActivity: Send + Sync {
    fn activity_type(&self) -> &'static str;
    fn context(&self) -> ActivityContext;
    fn may_be_stolen(&self) -> bool;
    fn expects_events(&self) -> bool;
    fn initialize(&mut self, cx: &ActivityCx<'_>) -> Result<Step, ActivityError>;
    fn process(&mut self, cx: &ActivityCx<'_>, event: Event) -> Result<Step, ActivityError>;
    fn cleanup(&mut self, cx: &ActivityCx<'_>);

    /// Serialize the current state (only done while the activity is still fresh).
    fn encode(&self) -> Result<serde_json::Value, serde_json::Error>;
}

pub struct TypedActivity<A: Activity> {
    activity: A,
}

impl<A: Activity> TypedActivity<A> {
    pub fn new(activity: A) -> Self {
        Self { activity }
    }

    pub fn boxed(activity: A) -> Box<dyn DynActivity> {
        Box::new(Self::new(activity))
    }
}

impl<A: Activity> DynActivity for TypedActivity<A> {
    fn activity_type(&self) -> &'static str {
        A::TYPE
    }

    fn context(&self) -> ActivityContext {
        self.activity.context()
    }

    fn may_be_stolen(&self) -> bool {
        self.activity.may_be_stolen()
    }

    fn expects_events(&self) -> bool {
        self.activity.expects_events()
    }

    fn initialize(&mut self, cx: &ActivityCx<'_>) -> Result<Step, ActivityError> {
        self.activity.initialize(cx)
    }

    fn process(&mut self, cx: &ActivityCx<'_>, event: Event) -> Result<Step, ActivityError> {
        self.activity.process(cx, event)
    }

    fn cleanup(&mut self, cx: &ActivityCx<'_>) {
        self.activity.cleanup(cx)
    }

    fn encode(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(&self.activity)
    }
}

/// Decoder stored in the registry for one activity type.
pub(crate) fn decode_typed<A: Activity>(
    payload: serde_json::Value,
) -> Result<Box<dyn DynActivity>, serde_json::Error> {
    let activity: A = serde_json::from_value(payload)?;
    Ok(TypedActivity::boxed(activity))
}
