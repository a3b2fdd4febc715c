//! Domain model (ids, contexts, lifecycle, events, wire messages).

pub mod context;
pub mod envelope;
pub mod event;
pub mod ids;
pub mod message;
pub mod node;
pub mod state;

pub use context::{
    ActivityContext, ExecutorContext, ExecutorProfile, StealStrategy, UnitExecutorContext,
    satisfied,
};
pub use envelope::ActivityEnvelope;
pub use event::Event;
pub use ids::{ActivityId, ExecutorId, RequestId};
pub use message::{MemberProfile, Message, Opcode, PoolSnapshot};
pub use node::{NodeId, RankInfo};
pub use state::{ActivityState, Step};
