//! ActivityRegistry - アクティビティ型の登録と管理
//!
//! # 学習ポイント
//! - HashMap<String, fn ptr> による型消去されたデコーダの管理
//! - Generic methods での登録と型安全性
//!
//! 盗まれてきた envelope は `activity_type` でデコーダを引いて
//! `Box<dyn DynActivity>` に戻します。

use std::collections::HashMap;

use super::activity::Activity;
use super::handler::{DynActivity, decode_typed};

type Decoder = fn(serde_json::Value) -> Result<Box<dyn DynActivity>, serde_json::Error>;

/// Activity types this node can run after receiving them over the wire.
#[derive(Default)]
pub struct ActivityRegistry {
    decoders: HashMap<String, Decoder>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Activity type '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("Activity type '{0}' is not registered")]
    UnknownType(String),

    #[error("Decoding '{activity_type}' failed: {message}")]
    Decode {
        activity_type: String,
        message: String,
    },
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    pub fn register<A: Activity>(&mut self) -> Result<(), RegistryError> {
        let activity_type = A::TYPE.to_string();
        if self.decoders.contains_key(&activity_type) {
            return Err(RegistryError::AlreadyRegistered(activity_type));
        }
        self.decoders.insert(activity_type, decode_typed::<A>);
        Ok(())
    }

    pub fn contains(&self, activity_type: &str) -> bool {
        self.decoders.contains_key(activity_type)
    }

    pub fn decode(
        &self,
        activity_type: &str,
        payload: serde_json::Value,
    ) -> Result<Box<dyn DynActivity>, RegistryError> {
        let decoder = self
            .decoders
            .get(activity_type)
            .ok_or_else(|| RegistryError::UnknownType(activity_type.to_string()))?;
        decoder(payload).map_err(|e| RegistryError::Decode {
            activity_type: activity_type.to_string(),
            message: e.to_string(),
        })
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.decoders.keys().cloned().collect();
        types.sort();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActivityContext, Step};
    use crate::error::ActivityError;
    use crate::typed::ActivityCx;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Leaf {
        value: i32,
    }

    impl Activity for Leaf {
        const TYPE: &'static str = "test.leaf.v1";

        fn context(&self) -> ActivityContext {
            ActivityContext::new("leaf", 0).unwrap()
        }

        fn initialize(&mut self, _cx: &ActivityCx<'_>) -> Result<Step, ActivityError> {
            Ok(Step::Finish)
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Other {
        name: String,
    }

    impl Activity for Other {
        const TYPE: &'static str = "test.other.v1";

        fn context(&self) -> ActivityContext {
            ActivityContext::new("other", 0).unwrap()
        }

        fn initialize(&mut self, _cx: &ActivityCx<'_>) -> Result<Step, ActivityError> {
            Ok(Step::Finish)
        }
    }

    #[test]
    fn test_register_and_decode() {
        let mut registry = ActivityRegistry::new();
        registry.register::<Leaf>().unwrap();

        let activity = registry
            .decode(Leaf::TYPE, serde_json::json!({ "value": 7 }))
            .unwrap();
        assert_eq!(activity.activity_type(), Leaf::TYPE);
        assert_eq!(activity.encode().unwrap(), serde_json::json!({ "value": 7 }));
    }

    #[test]
    fn test_double_registration() {
        let mut registry = ActivityRegistry::new();
        registry.register::<Leaf>().unwrap();
        let result = registry.register::<Leaf>();
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(_))));
    }

    #[test]
    fn test_unknown_type() {
        let registry = ActivityRegistry::new();
        let result = registry.decode("nope.v1", serde_json::json!({}));
        assert!(matches!(result, Err(RegistryError::UnknownType(t)) if t == "nope.v1"));
    }

    #[test]
    fn test_bad_payload() {
        let mut registry = ActivityRegistry::new();
        registry.register::<Leaf>().unwrap();
        let result = registry.decode(Leaf::TYPE, serde_json::json!({ "value": "x" }));
        assert!(matches!(result, Err(RegistryError::Decode { .. })));
    }

    #[test]
    fn test_registered_types() {
        let mut registry = ActivityRegistry::new();
        registry.register::<Other>().unwrap();
        registry.register::<Leaf>().unwrap();
        assert_eq!(
            registry.registered_types(),
            vec![Leaf::TYPE.to_string(), Other::TYPE.to_string()]
        );
        assert!(registry.contains(Other::TYPE));
    }
}
