//! Duplicate-request policy
//!
//! Decides what `load()` does when a task for the same key is still running.

use crate::task::TaskCore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateDecision {
    /// Keep the running task, drop the new request.
    Reject,
    /// Cancel the running task and start the new one.
    Supersede { may_interrupt: bool },
}

pub trait DuplicatePolicy<K>: Send {
    fn decide(&self, key: &K, running: &TaskCore) -> DuplicateDecision;
}

/// Keeps the first request; later ones are rejected until it finishes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectNew;

impl<K> DuplicatePolicy<K> for RejectNew {
    fn decide(&self, _key: &K, _running: &TaskCore) -> DuplicateDecision {
        DuplicateDecision::Reject
    }
}

/// Last request wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplaceRunning {
    pub may_interrupt: bool,
}

impl<K> DuplicatePolicy<K> for ReplaceRunning {
    fn decide(&self, _key: &K, _running: &TaskCore) -> DuplicateDecision {
        DuplicateDecision::Supersede {
            may_interrupt: self.may_interrupt,
        }
    }
}

impl<K, F> DuplicatePolicy<K> for F
where
    F: Fn(&K, &TaskCore) -> DuplicateDecision + Send,
{
    fn decide(&self, key: &K, running: &TaskCore) -> DuplicateDecision {
        self(key, running)
    }
}
