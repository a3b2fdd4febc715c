//! ActivityEnvelope - ノード間で移動するアクティビティ
//!
//! まだ initialize されていない（fresh な）アクティビティだけが
//! envelope になって他ノードへ盗まれます。

use serde::{Deserialize, Serialize};

use super::context::ActivityContext;
use super::event::Event;
use super::ids::ActivityId;

/// A fresh activity in transit, plus the events that reached it before it moved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEnvelope {
    pub id: ActivityId,
    pub parent: Option<ActivityId>,
    pub context: ActivityContext,
    pub activity_type: String,
    pub payload: serde_json::Value,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_events: Vec<Event>,
}
