//! Messages exchanged between nodes.
//!
//! The opcode space is split in two: control-plane opcodes (membership,
//! election, shutdown) live in `0x01..=0x0F`, data-plane opcodes (stealing,
//! event delivery) in `0x10..=0x1F`. The byte values are part of the wire
//! format, see `typed::codec`.

use serde::{Deserialize, Serialize};

use super::context::ExecutorProfile;
use super::envelope::ActivityEnvelope;
use super::event::Event;
use super::ids::{ActivityId, RequestId};
use super::node::NodeId;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    JoinRequest = 0x01,
    JoinReply = 0x02,
    PoolSnapshot = 0x03,
    Leave = 0x04,
    Elect = 0x05,
    Terminate = 0x06,
    StealRequest = 0x10,
    StealReply = 0x11,
    Event = 0x12,
    Retired = 0x13,
}

impl Opcode {
    pub fn from_byte(b: u8) -> Option<Self> {
        let op = match b {
            0x01 => Opcode::JoinRequest,
            0x02 => Opcode::JoinReply,
            0x03 => Opcode::PoolSnapshot,
            0x04 => Opcode::Leave,
            0x05 => Opcode::Elect,
            0x06 => Opcode::Terminate,
            0x10 => Opcode::StealRequest,
            0x11 => Opcode::StealReply,
            0x12 => Opcode::Event,
            0x13 => Opcode::Retired,
            _ => return None,
        };
        Some(op)
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn is_control(self) -> bool {
        self.as_byte() < 0x10
    }
}

/// Executor profiles advertised by one pool member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberProfile {
    pub node: NodeId,
    pub executors: Vec<ExecutorProfile>,
}

/// Full membership of one pool at one timestamp.
///
/// Always disseminated whole, never as a diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub tag: String,
    pub master: Option<NodeId>,
    pub members: Vec<NodeId>,
    pub timestamp: u64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profiles: Vec<MemberProfile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Message {
    JoinRequest {
        tag: String,
        node: NodeId,
        executors: Vec<ExecutorProfile>,
    },
    JoinReply {
        rank: u32,
        snapshot: PoolSnapshot,
    },
    PoolSnapshot {
        snapshot: PoolSnapshot,
    },
    Leave {
        tag: String,
        node: NodeId,
    },
    /// `winner: None` asks the receiver for its cached result; `Some` announces one.
    Elect {
        tag: String,
        winner: Option<NodeId>,
    },
    Terminate {
        tag: String,
    },
    StealRequest {
        request_id: RequestId,
        tag: String,
        profile: ExecutorProfile,
        /// Activity types the thief can decode.
        accepts: Vec<String>,
    },
    StealReply {
        request_id: RequestId,
        activity: Option<ActivityEnvelope>,
    },
    Event {
        event: Event,
    },
    /// `activity` finished or came back at `at`; the receiver drops its forwarding entry.
    Retired {
        activity: ActivityId,
        at: NodeId,
    },
}

impl Message {
    pub fn opcode(&self) -> Opcode {
        match self {
            Message::JoinRequest { .. } => Opcode::JoinRequest,
            Message::JoinReply { .. } => Opcode::JoinReply,
            Message::PoolSnapshot { .. } => Opcode::PoolSnapshot,
            Message::Leave { .. } => Opcode::Leave,
            Message::Elect { .. } => Opcode::Elect,
            Message::Terminate { .. } => Opcode::Terminate,
            Message::StealRequest { .. } => Opcode::StealRequest,
            Message::StealReply { .. } => Opcode::StealReply,
            Message::Event { .. } => Opcode::Event,
            Message::Retired { .. } => Opcode::Retired,
        }
    }
}
