//! Outcome model: what a load request and a cache-backed load can end in.
//!
//! These types do not assume any particular executor or fetch collaborator.
//! They only define the "shape" of results the consumer can observe.

use serde::{Deserialize, Serialize};

use super::TaskId;

/// Final value of a cache-backed load.
///
/// A failed or cancelled load is `None` at the call site; this enum only covers
/// the two successful shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheOutcome<R> {
    /// Freshly downloaded content, parsed and promoted into the cache file.
    Loaded(R),

    /// Downloaded content matched the existing cache byte for byte.
    /// The consumer already has this value from the cache-hit progress update
    /// and must not re-render.
    NotModified,
}

impl<R> CacheOutcome<R> {
    pub fn is_not_modified(&self) -> bool {
        matches!(self, CacheOutcome::NotModified)
    }

    pub fn loaded(self) -> Option<R> {
        match self {
            CacheOutcome::Loaded(value) => Some(value),
            CacheOutcome::NotModified => None,
        }
    }
}

/// Why a load request was dropped without creating a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The loader has been shut down.
    Shutdown,

    /// A task for the same key is still running and the policy kept it.
    Duplicate,
}

/// Synchronous answer to `load()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// A task was created and handed to the executor.
    Submitted(TaskId),

    /// No task was created.
    Rejected(RejectReason),
}

impl LoadStatus {
    pub fn is_submitted(&self) -> bool {
        matches!(self, LoadStatus::Submitted(_))
    }

    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            LoadStatus::Submitted(id) => Some(*id),
            LoadStatus::Rejected(_) => None,
        }
    }
}
