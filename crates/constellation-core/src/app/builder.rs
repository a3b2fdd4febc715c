//! NodeBuilder - ノードの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 開発体験の改善（明確なエラーメッセージ）

use std::sync::Arc;

use super::config::NodeConfig;
use super::node::Node;
use crate::error::ConfigError;
use crate::ports::{IdGenerator, SystemClock, Transport, UlidGenerator};
use crate::typed::{Activity, ActivityRegistry, RegistryError};

/// NodeBuilder はノードを構築
///
/// # 使用例
/// ```ignore
/// let node = NodeBuilder::new(transport, config)
///     .register::<Fib>()?
///     .expect_activities(&["demo.fib.v1"])
///     .build()?;
/// node.activate().await?;
/// ```
///
/// # Fail-fast 設計
/// - 設定（executor、strategy の範囲）を build() 時に検証
/// - expect_activities() の期待集合 ⊆ 登録済み集合をチェック
pub struct NodeBuilder {
    transport: Arc<dyn Transport>,
    config: NodeConfig,
    registry: ActivityRegistry,
    expected_activities: Option<Vec<String>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

impl NodeBuilder {
    pub fn new(transport: Arc<dyn Transport>, config: NodeConfig) -> Self {
        Self {
            transport,
            config,
            registry: ActivityRegistry::new(),
            expected_activities: None,
            ids: None,
        }
    }

    /// Activity 型を登録（盗んできた envelope のデコードに使う）
    pub fn register<A: Activity>(mut self) -> Result<Self, RegistryError> {
        self.registry.register::<A>()?;
        Ok(self)
    }

    pub fn expect_activities(mut self, activity_types: &[&str]) -> Self {
        self.expected_activities = Some(activity_types.iter().map(|t| t.to_string()).collect());
        self
    }

    /// Replace the default ULID generator (tests pin the clock this way).
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn build(self) -> Result<Node, ConfigError> {
        self.config.validate()?;
        if let Some(expected) = &self.expected_activities {
            let missing: Vec<String> = expected
                .iter()
                .filter(|t| !self.registry.contains(t))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(ConfigError::MissingActivityTypes(missing));
            }
        }
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(SystemClock)));
        Ok(Node::assemble(self.transport, self.config, self.registry, ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::config::ExecutorConfig;
    use crate::app::testing::Fib;
    use crate::domain::{ExecutorContext, NodeId};
    use crate::impls::InMemoryNetwork;

    fn config() -> NodeConfig {
        NodeConfig::new(
            "p",
            vec![ExecutorConfig::new(ExecutorContext::unit("fib").unwrap())],
        )
    }

    #[test]
    fn test_build_with_expected_activities() {
        let net = InMemoryNetwork::new();
        let node = NodeBuilder::new(net.connect(NodeId::new("a")), config())
            .register::<Fib>()
            .unwrap()
            .expect_activities(&[Fib::TYPE])
            .build();
        assert!(node.is_ok());
    }

    #[test]
    fn test_missing_activities() {
        let net = InMemoryNetwork::new();
        let result = NodeBuilder::new(net.connect(NodeId::new("a")), config())
            .register::<Fib>()
            .unwrap()
            .expect_activities(&[Fib::TYPE, "demo.unknown.v1"])
            .build();
        match result {
            Err(ConfigError::MissingActivityTypes(missing)) => {
                assert_eq!(missing, vec!["demo.unknown.v1".to_string()]);
            }
            _ => panic!("expected MissingActivityTypes"),
        }
    }

    #[test]
    fn test_invalid_config_fails_fast() {
        let net = InMemoryNetwork::new();
        let result = NodeBuilder::new(
            net.connect(NodeId::new("a")),
            NodeConfig::new("p", vec![]),
        )
        .build();
        assert!(matches!(result, Err(ConfigError::NoExecutors)));
    }

    #[test]
    fn test_double_registration() {
        let net = InMemoryNetwork::new();
        let result = NodeBuilder::new(net.connect(NodeId::new("a")), config())
            .register::<Fib>()
            .unwrap()
            .register::<Fib>();
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(_))));
    }
}
