//! Task and loader lifecycle states.

use serde::{Deserialize, Serialize};

/// TaskState はタスクの状態を表現
///
/// State transitions:
/// - Running -> Cancelled
/// - Running -> Completed
///
/// Transitions are never reversed. Only `clear_for_recycle` puts a core back
/// to `Running`, and that happens after the task has left every shared
/// structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TaskState {
    Running = 0,
    Cancelled = 1,
    Completed = 2,
}

impl TaskState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskState::Running,
            1 => TaskState::Cancelled,
            _ => TaskState::Completed,
        }
    }

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Cancelled | TaskState::Completed)
    }
}

/// LoaderState はローダー全体の状態
///
/// - running: 通常
/// - paused: ワーカーはロード本体の開始前で待つ
/// - shutdown: 新しいタスクは受け付けない（再開不可）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoaderState {
    Running,
    Paused,
    Shutdown,
}
