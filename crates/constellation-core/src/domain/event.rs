//! Events exchanged between activities.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::ids::ActivityId;

/// A message addressed to one activity.
///
/// `data` is opaque JSON. `error` is set when the event reports a fault of
/// the source activity instead of a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub source: Option<ActivityId>,
    pub target: ActivityId,
    pub data: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Event {
    pub fn new(source: Option<ActivityId>, target: ActivityId, data: serde_json::Value) -> Self {
        Self {
            source,
            target,
            data,
            error: None,
        }
    }

    pub fn failure(source: Option<ActivityId>, target: ActivityId, error: impl Into<String>) -> Self {
        Self {
            source,
            target,
            data: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Decode the payload into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }
}
