use thiserror::Error;

use crate::domain::{ActivityContext, NodeId};

/// 構築時の設定エラー（fail-fast）。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("context name must not be empty")]
    EmptyContextName,

    #[error("invalid rank range: lo={lo} > hi={hi}")]
    InvalidRange { lo: i64, hi: i64 },

    #[error("pool tag must not be empty")]
    EmptyPoolTag,

    #[error("steal backoff multiplier must be finite and at least 1.0, got {0}")]
    InvalidMultiplier(String),

    #[error("node must have at least one executor")]
    NoExecutors,

    #[error("Missing activity types: {0:?}. These activities were expected but not registered.")]
    MissingActivityTypes(Vec<String>),

    #[error("config parse error: {0}")]
    Parse(String),

    #[error("config io error: {0}")]
    Io(String),
}

/// Submission failures reported synchronously to the submitter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("no suitable executor for context {0}")]
    NoSuitableExecutor(ActivityContext),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommError {
    #[error("send to {0} failed")]
    SendFailed(NodeId),

    #[error("communication layer is not active")]
    Inactive,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("codec error: {0}")]
    Codec(String),
}

/// Membership invariant violations. These indicate a protocol bug.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("node {node} is already a member of pool '{tag}'")]
    DuplicateMember { tag: String, node: NodeId },

    #[error("pool '{0}' is not registered on this node")]
    UnknownPool(String),

    #[error("only the master of pool '{0}' can do this")]
    NotMaster(String),
}

/// A fault raised from inside `initialize` / `process`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ActivityError(pub String);

impl ActivityError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<SubmitError> for ActivityError {
    fn from(e: SubmitError) -> Self {
        Self(e.to_string())
    }
}

impl From<serde_json::Error> for ActivityError {
    fn from(e: serde_json::Error) -> Self {
        Self(format!("json: {e}"))
    }
}

#[derive(Debug, Error)]
pub enum ConstellationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Comm(#[from] CommError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("event payload encode failed: {0}")]
    Encode(String),
}
