//! Typed - 型付き Activity API
//!
//! activity_type の typo を型で排除し、デコーダとの対応付けを静的に保証します。
//!
//! # 二層構造
//! - **表層（Typed）**: `Activity` trait, `ActivityCx` - 型安全
//! - **内部（Dyn）**: `DynActivity` trait - object-safe, type erasure
//!
//! ワイヤ上の `Message` は `MessageCodec` でバイト列にします。

pub mod activity;
pub mod codec;
pub mod handler;
pub mod registry;

pub use self::activity::{Activity, ActivityCx};
pub use self::codec::{CodecError, MessageCodec};
pub use self::handler::{DynActivity, TypedActivity};
pub use self::registry::{ActivityRegistry, RegistryError};
