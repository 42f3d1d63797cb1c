//! Fixed-capacity object pools.
//!
//! `Pool` is a plain free list: `obtain()` pops an idle element or asks the
//! factory for a new one, `recycle()` pushes it back unless the pool is full.
//! It is owned by the consumer side and never shared between threads, so it
//! needs no locking.
//!
//! `TaskPool` specialises it for task cores. A core is only taken back when the
//! consumer holds the last reference to it. That is what keeps a recycled core
//! from being observed by a worker that still runs the previous submission.

use std::sync::Arc;

use tracing::trace;

use crate::domain::TaskId;
use crate::observability::PoolStats;
use crate::task::TaskCore;

/// Creates a new element when the pool is empty.
pub trait Factory<T> {
    fn new_instance(&self) -> T;
}

impl<T, F> Factory<T> for F
where
    F: Fn() -> T,
{
    fn new_instance(&self) -> T {
        self()
    }
}

pub struct Pool<T, F> {
    factory: F,
    idle: Vec<T>,
    capacity: usize,
    created: u64,
    reused: u64,
}

impl<T, F: Factory<T>> Pool<T, F> {
    /// `capacity` is the maximum number of idle elements kept around.
    /// A capacity of 0 disables pooling.
    pub fn new(factory: F, capacity: usize) -> Self {
        Self {
            factory,
            idle: Vec::with_capacity(capacity),
            capacity,
            created: 0,
            reused: 0,
        }
    }

    /// Retrieves an element, allocating only if no idle element is available.
    pub fn obtain(&mut self) -> T {
        match self.idle.pop() {
            Some(element) => {
                self.reused += 1;
                element
            }
            None => {
                self.created += 1;
                self.factory.new_instance()
            }
        }
    }

    /// Returns `element` to the pool. Returns `false` (and drops the element)
    /// when the pool is already full.
    pub fn recycle(&mut self, element: T) -> bool {
        if self.idle.len() < self.capacity {
            self.idle.push(element);
            true
        } else {
            false
        }
    }

    pub fn idle(&self) -> usize {
        self.idle.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity,
            idle: self.idle.len(),
            created: self.created,
            reused: self.reused,
        }
    }
}

/// Pool of [`TaskCore`]s.
pub struct TaskPool {
    inner: Pool<Arc<TaskCore>, fn() -> Arc<TaskCore>>,
}

fn new_core() -> Arc<TaskCore> {
    Arc::new(TaskCore::new())
}

impl TaskPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Pool::new(new_core as fn() -> Arc<TaskCore>, capacity),
        }
    }

    /// Hands out a core in the `Running` state with a fresh identity.
    pub fn obtain(&mut self) -> Arc<TaskCore> {
        let mut core = self.inner.obtain();
        match Arc::get_mut(&mut core) {
            Some(unique) => unique.assign_id(TaskId::generate()),
            // pooled cores are always unique; fall back to a new one anyway
            None => core = new_core(),
        }
        core
    }

    /// Clears `core` and keeps it for reuse.
    ///
    /// Returns `false` when the core was dropped instead, either because the
    /// pool is full or because another reference to it is still alive.
    pub fn recycle(&mut self, mut core: Arc<TaskCore>) -> bool {
        match Arc::get_mut(&mut core) {
            Some(unique) => {
                unique.clear_for_recycle();
                self.inner.recycle(core)
            }
            None => {
                trace!(task = %core.id(), "task core still shared, not pooled");
                false
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.stats()
    }
}
