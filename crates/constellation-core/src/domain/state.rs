//! Activity lifecycle state.

use serde::{Deserialize, Serialize};

/// ActivityState はアクティビティのライフサイクル状態
///
/// # 状態遷移
/// - Initialize -> Suspend <-> Process -> Finish
/// - Initialize -> Finish（initialize だけで完了する場合）
///
/// Finish の後に cleanup が一度だけ呼ばれ、アクティビティは破棄されます。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityState {
    /// Submitted, `initialize` not run yet. Only activities in this state can be stolen.
    Initialize,

    /// Dormant, waiting for an event. Holds no queue slot.
    Suspend,

    /// `process` is running for one event.
    Process,

    /// Terminal.
    Finish,
}

impl ActivityState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ActivityState::Finish)
    }
}

/// What `initialize` / `process` ask for next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Suspend,
    Finish,
}
