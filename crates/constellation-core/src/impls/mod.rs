//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryNetwork / InMemoryTransport**: プロセス内で完結するトランスポート
//!
//! # 本番用実装
//! ソケットやメッセージバスを使う Transport は別クレートに配置する想定です。

pub mod inmem_transport;

pub use self::inmem_transport::{InMemoryNetwork, InMemoryTransport};
