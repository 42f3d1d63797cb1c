//! Task identifiers.
//!
//! # ULID ベースの ID
//! プールから取り出すたびに新しい TaskId を振り直します。
//! 再利用された TaskCore でも、以前の ID と同じ値になることはありません。
//!
//! ## ULID の特性
//! - **時刻でソート可能**: 生成順序でソートできる
//! - **衝突しない**: 調整なしで複数スレッドから生成できる

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Identity of one submission of a task.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Ulid);

impl TaskId {
    /// 新しい TaskId を生成
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for TaskId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}
