//! constellation-core
//!
//! Context-aware activity scheduling across a pool of nodes.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, context, state, event, envelope, message）
//! - **ports**: 抽象化レイヤー（Transport, MessageHandler, IdGenerator, Clock）
//! - **typed**: 型付き Activity API（Activity trait, ActivityCx, ActivityRegistry, MessageCodec）
//! - **pool**: PoolInfo, 選挙キャッシュ, CommunicationLayer, PoolCoordinator
//! - **app**: Scheduler, executor ループ, Node とその builder
//! - **impls**: 実装（InMemoryNetwork など開発・テスト用）

pub mod app;
pub mod domain;
pub mod error;
pub mod impls;
pub mod pool;
pub mod ports;
pub(crate) mod sync;
pub mod typed;

pub use app::{
    CollectorHandle, ExecutorConfig, FailurePolicy, Node, NodeBuilder, NodeConfig, NodeStats,
    StealConfig,
};
pub use domain::{
    ActivityContext, ActivityId, Event, ExecutorContext, NodeId, StealStrategy, Step,
};
pub use error::{ActivityError, ConstellationError};
pub use typed::{Activity, ActivityCx};
