//! App - アプリケーション層
//!
//! ports と pool を組み合わせて、1 ノード分のランタイムを組み立てます。
//!
//! # 主要コンポーネント
//! - **NodeBuilder / Node**: 構築とライフサイクル（activate → submit → done）
//! - **Scheduler**: activity のアリーナ、executor ごとのキュー、イベント配送
//! - **ExecutorGroup**: executor ごとの実行ループ（ローカル → 兄弟スティール → リモートスティール）
//! - **SingleEventCollector**: 外部から結果を 1 つ受け取るための activity

pub mod backoff;
pub mod builder;
pub mod collector;
pub mod config;
pub mod executor;
pub mod node;
pub mod scheduler;
pub mod status;

#[cfg(test)]
pub(crate) mod testing;

pub use self::backoff::StealBackoff;
pub use self::builder::NodeBuilder;
pub use self::collector::{CollectorHandle, SingleEventCollector};
pub use self::config::{ExecutorConfig, FailurePolicy, NodeConfig, StealConfig};
pub use self::executor::{ExecutorGroup, RemoteSteal};
pub use self::node::Node;
pub use self::scheduler::{Outbound, Scheduler};
pub use self::status::NodeStats;
