//! SingleEventCollector - 結果を 1 件だけ受け取るアクティビティ
//!
//! 外側の async コードとアクティビティ木の橋渡しです。ルートの親として
//! submit しておき、`CollectorHandle::wait` で最初のイベントを受け取ります。
//! oneshot を抱えているので他ノードへは盗まれません。

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::domain::{ActivityContext, Event, Step};
use crate::error::ActivityError;
use crate::typed::{Activity, ActivityCx};

#[derive(Serialize, Deserialize)]
pub struct SingleEventCollector {
    context: ActivityContext,
    #[serde(skip)]
    reply: Option<oneshot::Sender<Event>>,
}

impl SingleEventCollector {
    pub fn new(context: ActivityContext) -> (Self, CollectorHandle) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                context,
                reply: Some(tx),
            },
            CollectorHandle { rx },
        )
    }
}

impl Activity for SingleEventCollector {
    const TYPE: &'static str = "constellation.collector.v1";

    fn context(&self) -> ActivityContext {
        self.context.clone()
    }

    fn may_be_stolen(&self) -> bool {
        false
    }

    fn initialize(&mut self, _cx: &ActivityCx<'_>) -> Result<Step, ActivityError> {
        Ok(Step::Suspend)
    }

    fn process(&mut self, _cx: &ActivityCx<'_>, event: Event) -> Result<Step, ActivityError> {
        if let Some(reply) = self.reply.take() {
            // the waiter may have given up; nothing else to do then
            let _ = reply.send(event);
        }
        Ok(Step::Finish)
    }
}

/// Await side of a [`SingleEventCollector`].
pub struct CollectorHandle {
    rx: oneshot::Receiver<Event>,
}

impl CollectorHandle {
    /// `None` if the collector was dropped without receiving anything.
    pub async fn wait(self) -> Option<Event> {
        self.rx.await.ok()
    }

    pub async fn wait_timeout(self, timeout: Duration) -> Option<Event> {
        tokio::time::timeout(timeout, self.rx).await.ok()?.ok()
    }
}
