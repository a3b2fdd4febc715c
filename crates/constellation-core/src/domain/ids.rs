//! Domain identifiers (strongly-typed IDs).
//!
//! ULID ベースの `Id<T>` に Phantom type のマーカーを付けて、
//! `ExecutorId` と `RequestId` を混同できないようにしています。
//!
//! `ActivityId` だけは別扱いです。イベントをリモートへ配送するために
//! 「どのノードで生成されたか（origin）」を ID 自体に持たせています。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

use super::node::NodeId;

/// IdMarker は各 ID 型のマーカー trait
pub trait IdMarker: Send + Sync + 'static {
    /// Display で使うプレフィックス（例: "executor-"）
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// `T` は PhantomData で、実行時にはメモリを消費しません。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Executor のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Executor {}

impl IdMarker for Executor {
    fn prefix() -> &'static str {
        "executor-"
    }
}

/// Steal request のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StealRequest {}

impl IdMarker for StealRequest {
    fn prefix() -> &'static str {
        "steal-"
    }
}

/// Identifier of a local worker.
pub type ExecutorId = Id<Executor>;

/// Correlates a STEAL_REPLY with the STEAL_REQUEST that asked for it.
pub type RequestId = Id<StealRequest>;

/// Identifier of an activity.
///
/// Assigned once at submission and never reused. `origin` is the node that
/// created it; events for an activity that has since been stolen are routed
/// through its origin, which forwards them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActivityId {
    origin: NodeId,
    ulid: Ulid,
}

impl ActivityId {
    pub fn new(origin: NodeId, ulid: Ulid) -> Self {
        Self { origin, ulid }
    }

    pub fn origin(&self) -> &NodeId {
        &self.origin
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "activity-{}@{}", self.ulid, self.origin)
    }
}
