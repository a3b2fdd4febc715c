//! NodeConfig - ノード設定（JSON）
//!
//! # 例
//! ```json
//! {
//!   "pool": "fib",
//!   "executors": [
//!     { "context": { "kind": "unit", "value": { "name": "fib" } } }
//!   ],
//!   "steal": { "remote": true },
//!   "failure_policy": "notify_parent"
//! }
//! ```
//!
//! 省略したフィールドは既定値になります。`validate()` で fail-fast 検証します。

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{ExecutorContext, ExecutorProfile, StealStrategy};
use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Pool this node joins on activation.
    #[serde(default = "default_pool")]
    pub pool: String,

    pub executors: Vec<ExecutorConfig>,

    #[serde(default)]
    pub steal: StealConfig,

    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

fn default_pool() -> String {
    "default".to_string()
}

/// One executor: what it offers and how it picks work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub context: ExecutorContext,

    /// Applied to activities submitted on this node.
    #[serde(default)]
    pub submit_strategy: StealStrategy,

    /// Applied to siblings' queues and to remote victims.
    #[serde(default)]
    pub steal_strategy: StealStrategy,
}

impl ExecutorConfig {
    pub fn new(context: ExecutorContext) -> Self {
        Self {
            context,
            submit_strategy: StealStrategy::Any,
            steal_strategy: StealStrategy::Any,
        }
    }

    pub fn with_submit_strategy(mut self, strategy: StealStrategy) -> Self {
        self.submit_strategy = strategy;
        self
    }

    pub fn with_steal_strategy(mut self, strategy: StealStrategy) -> Self {
        self.steal_strategy = strategy;
        self
    }

    /// What peers see when deciding whether to send us work.
    pub fn profile(&self) -> ExecutorProfile {
        ExecutorProfile::new(self.context.clone(), self.steal_strategy)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.context.validate()?;
        self.submit_strategy.validate()?;
        self.steal_strategy.validate()
    }
}

/// Idle executors back off exponentially between steal attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StealConfig {
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    /// How long a thief waits for a STEAL_REPLY.
    pub remote_timeout_ms: u64,
    /// `false` keeps stealing inside this node.
    pub remote: bool,
}

impl Default for StealConfig {
    fn default() -> Self {
        Self {
            base_backoff_ms: 1,
            max_backoff_ms: 50,
            multiplier: 2.0,
            remote_timeout_ms: 500,
            remote: true,
        }
    }
}

impl StealConfig {
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    /// The backoff must never shrink or go negative.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::InvalidMultiplier(self.multiplier.to_string()));
        }
        Ok(())
    }
}

/// What happens when `initialize` / `process` returns an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Clean up, then send the parent an error event.
    #[default]
    NotifyParent,
    /// Clean up and log only.
    CleanupOnly,
}

impl NodeConfig {
    pub fn new(pool: impl Into<String>, executors: Vec<ExecutorConfig>) -> Self {
        Self {
            pool: pool.into(),
            executors,
            steal: StealConfig::default(),
            failure_policy: FailurePolicy::default(),
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.executors.is_empty() {
            return Err(ConfigError::NoExecutors);
        }
        if self.pool.trim().is_empty() {
            return Err(ConfigError::EmptyPoolTag);
        }
        for executor in &self.executors {
            executor.validate()?;
        }
        self.steal.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn parses_minimal_json_with_defaults() {
        let config = NodeConfig::from_json_str(
            r#"{
                "executors": [
                    { "context": { "kind": "unit", "value": { "name": "fib" } } }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.pool, "default");
        assert_eq!(config.executors.len(), 1);
        assert_eq!(config.executors[0].steal_strategy, StealStrategy::Any);
        assert_eq!(config.steal, StealConfig::default());
        assert_eq!(config.failure_policy, FailurePolicy::NotifyParent);
        config.validate().unwrap();
    }

    #[test]
    fn parses_strategies_and_policy() {
        let config = NodeConfig::from_json_str(
            r#"{
                "pool": "p",
                "executors": [{
                    "context": { "kind": "unit", "value": { "name": "a" } },
                    "submit_strategy": { "kind": "value", "value": 3 },
                    "steal_strategy": { "kind": "range", "lo": 1, "hi": 5 }
                }],
                "steal": { "remote": false },
                "failure_policy": "cleanup_only"
            }"#,
        )
        .unwrap();

        assert_eq!(config.executors[0].submit_strategy, StealStrategy::value(3));
        assert_eq!(
            config.executors[0].steal_strategy,
            StealStrategy::range(1, 5).unwrap()
        );
        assert!(!config.steal.remote);
        assert_eq!(config.steal.max_backoff_ms, 50);
        assert_eq!(config.failure_policy, FailurePolicy::CleanupOnly);
    }

    #[test]
    fn rejects_inverted_range_and_empty_executor_list() {
        let mut config = NodeConfig::new(
            "p",
            vec![
                ExecutorConfig::new(ExecutorContext::unit("a").unwrap())
                    .with_steal_strategy(StealStrategy::Range { lo: 5, hi: 1 }),
            ],
        );
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidRange { lo: 5, hi: 1 })
        );

        config.executors.clear();
        assert_eq!(config.validate(), Err(ConfigError::NoExecutors));
    }

    #[rstest]
    #[case(-2.0)]
    #[case(0.5)]
    #[case(f64::NAN)]
    #[case(f64::INFINITY)]
    fn rejects_multipliers_that_do_not_grow(#[case] multiplier: f64) {
        let mut config = NodeConfig::new(
            "p",
            vec![ExecutorConfig::new(ExecutorContext::unit("a").unwrap())],
        );
        config.steal.multiplier = multiplier;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidMultiplier(_))
        ));

        config.steal.multiplier = 1.0;
        config.validate().unwrap();
    }

    #[test]
    fn negative_multiplier_from_json_fails_validation() {
        let config = NodeConfig::from_json_str(
            r#"{
                "executors": [
                    { "context": { "kind": "unit", "value": { "name": "fib" } } }
                ],
                "steal": { "multiplier": -1.5 }
            }"#,
        )
        .unwrap();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidMultiplier("-1.5".to_string()))
        );
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            NodeConfig::from_json_str("{ nope"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            NodeConfig::from_path("/definitely/not/here.json"),
            Err(ConfigError::Io(_))
        ));
    }
}
