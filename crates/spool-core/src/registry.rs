//! RunningTaskRegistry - キーごとの実行中タスク
//!
//! 同じキーに対して同時に走るタスクは一つだけです。
//! コンシューマー側のスレッドからのみ触るのでロックは不要です。

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use tracing::debug;

use crate::domain::TaskId;
use crate::task::TaskCore;

/// Map of key -> the task currently loading it.
#[derive(Debug)]
pub struct RunningTaskRegistry<K> {
    tasks: HashMap<K, Arc<TaskCore>>,
}

impl<K: Eq + Hash + Debug> RunningTaskRegistry<K> {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<&Arc<TaskCore>> {
        self.tasks.get(key)
    }

    /// True when `key` has a registered task that was not cancelled.
    pub fn is_loading(&self, key: &K) -> bool {
        self.tasks.get(key).is_some_and(|core| !core.is_cancelled())
    }

    /// Registers `core` for `key` and returns the entry it replaced.
    pub fn insert(&mut self, key: K, core: Arc<TaskCore>) -> Option<Arc<TaskCore>> {
        self.tasks.insert(key, core)
    }

    /// Removes the entry for `key` only if it still belongs to task `id`.
    ///
    /// A finished task must not evict the task that superseded it.
    pub fn remove_if_current(&mut self, key: &K, id: TaskId) -> bool {
        match self.tasks.get(key) {
            Some(core) if core.id() == id => {
                self.tasks.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Removes and cancels the task registered for `key`.
    ///
    /// Returns `false` when nothing was registered or the task had already
    /// completed or been cancelled.
    pub fn cancel(&mut self, key: &K, may_interrupt: bool) -> bool {
        match self.tasks.remove(key) {
            Some(core) => {
                let cancelled = core.cancel(may_interrupt);
                debug!(?key, task = %core.id(), cancelled, "task removed from registry");
                cancelled
            }
            None => false,
        }
    }

    /// Cancels every registered task without interrupting, then clears the map.
    /// Returns how many tasks were actually cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let cancelled = self
            .tasks
            .values()
            .filter(|core| core.cancel(false))
            .count();
        self.tasks.clear();
        cancelled
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl<K: Eq + Hash + Debug> Default for RunningTaskRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}
