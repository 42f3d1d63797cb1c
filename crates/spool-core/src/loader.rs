//! Loader - エンジン本体
//!
//! Executor にタスクを投げ、ワーカーからの通知を一本のチャネルで受け取ります。
//!
//! # スレッドモデル
//! - コンシューマー（Loader を所有する側）: load / dispatch / cancel / pause / shutdown
//! - ワーカー（Executor のスレッド）: ロード本体だけを実行
//!
//! ワーカーとコンシューマーの間で共有されるのは
//! `Lifecycle`（pause / shutdown）と各タスクの `TaskCore` だけです。

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use crate::domain::{LoaderState, Notification};
use crate::error::SpoolError;
use crate::observability::{LoaderSnapshot, PoolStats};
use crate::pool::TaskPool;
use crate::ports::{Executor, Job};
use crate::registry::RunningTaskRegistry;
use crate::task::{self, ProgressFn, TaskContext, TaskCore};

/// Pause / shutdown state shared with workers.
#[derive(Debug)]
pub struct Lifecycle {
    state: Mutex<LoaderState>,
    resumed: Condvar,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(LoaderState::Running),
            resumed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LoaderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> LoaderState {
        *self.lock()
    }

    pub fn is_shutdown(&self) -> bool {
        self.state() == LoaderState::Shutdown
    }

    pub(crate) fn pause(&self) -> bool {
        let mut state = self.lock();
        if *state == LoaderState::Running {
            *state = LoaderState::Paused;
            true
        } else {
            false
        }
    }

    pub(crate) fn resume(&self) -> bool {
        let mut state = self.lock();
        if *state == LoaderState::Paused {
            *state = LoaderState::Running;
            self.resumed.notify_all();
            true
        } else {
            false
        }
    }

    /// Returns `false` if already shut down.
    pub(crate) fn shutdown(&self) -> bool {
        let mut state = self.lock();
        if *state == LoaderState::Shutdown {
            return false;
        }
        *state = LoaderState::Shutdown;
        self.resumed.notify_all();
        true
    }

    /// Blocks the calling worker while the loader is paused.
    pub(crate) fn wait_resume_if_paused(&self) {
        let mut state = self.lock();
        while *state == LoaderState::Paused {
            state = self
                .resumed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

const JOB_PENDING: u8 = 0;
const JOB_ACCEPTED: u8 = 1;
const JOB_DROPPED: u8 = 2;

/// Travels inside a job and reports the task as cancelled if the executor
/// drops the job without running it.
///
/// While `execute` has not returned, the submitter owns that report: a
/// rejected job must not produce a notification.
struct JobGuard<P, O> {
    core: Option<Arc<TaskCore>>,
    handoff: Arc<AtomicU8>,
    tx: UnboundedSender<Notification<P, O>>,
}

impl<P, O> JobGuard<P, O> {
    /// Hands the core to the worker; the guard is then inert.
    fn disarm(&mut self) -> Option<Arc<TaskCore>> {
        self.core.take()
    }
}

impl<P, O> Drop for JobGuard<P, O> {
    fn drop(&mut self) {
        let Some(core) = self.core.take() else {
            return;
        };
        let task = core.id();
        core.cancel(false);
        // released before the notification so the consumer can recycle it
        drop(core);

        let accepted = self
            .handoff
            .compare_exchange(JOB_PENDING, JOB_DROPPED, Ordering::AcqRel, Ordering::Acquire)
            .is_err();
        if accepted {
            warn!(task = %task, "executor dropped job without running it");
            let _ = self.tx.send(Notification::Finished { task, result: None });
        }
    }
}

/// Base engine: executor, task pool, running-task registry and the
/// notification channel.
///
/// Generic over the key `K`, progress value `P` and result `O`. Must be driven
/// from a single consumer; it is not shared between threads.
pub struct Loader<K, P, O> {
    executor: Arc<dyn Executor>,
    lifecycle: Arc<Lifecycle>,
    pool: TaskPool,
    registry: RunningTaskRegistry<K>,
    outstanding: usize,
    tx: UnboundedSender<Notification<P, O>>,
    rx: UnboundedReceiver<Notification<P, O>>,
}

impl<K, P, O> Loader<K, P, O>
where
    K: Eq + Hash + Debug,
    P: Send + 'static,
    O: Send + 'static,
{
    pub fn new(executor: Arc<dyn Executor>, pool_capacity: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            executor,
            lifecycle: Arc::new(Lifecycle::new()),
            pool: TaskPool::new(pool_capacity),
            registry: RunningTaskRegistry::new(),
            outstanding: 0,
            tx,
            rx,
        }
    }

    pub fn state(&self) -> LoaderState {
        self.lifecycle.state()
    }

    pub fn is_shutdown(&self) -> bool {
        self.lifecycle.is_shutdown()
    }

    /// Workers that have not started their load body yet wait until
    /// `resume()`. Loads already in progress are not affected.
    pub fn pause(&self) {
        if self.lifecycle.pause() {
            debug!("loader paused");
        }
    }

    pub fn resume(&self) {
        if self.lifecycle.resume() {
            debug!("loader resumed");
        }
    }

    /// Stops the loader for good: wakes paused workers, cancels every
    /// registered task and clears the registry. Idempotent.
    pub fn shutdown(&mut self) {
        if !self.lifecycle.shutdown() {
            return;
        }
        let cancelled = self.registry.cancel_all();
        info!(cancelled, outstanding = self.outstanding, "loader shut down");
    }

    /// Cancels the task registered for `key`, removing it from the registry.
    pub fn cancel_task(&mut self, key: &K, may_interrupt: bool) -> bool {
        self.registry.cancel(key, may_interrupt)
    }

    /// A task counts as cancelled once the loader is shut down.
    pub fn is_task_cancelled(&self, core: &TaskCore) -> bool {
        self.lifecycle.is_shutdown() || core.is_cancelled()
    }

    pub fn registry(&self) -> &RunningTaskRegistry<K> {
        &self.registry
    }

    pub(crate) fn registry_mut(&mut self) -> &mut RunningTaskRegistry<K> {
        &mut self.registry
    }

    pub(crate) fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Tasks submitted whose core has not been returned yet.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn snapshot(&self) -> LoaderSnapshot {
        LoaderSnapshot {
            state: self.state(),
            registered: self.registry.len(),
            in_flight: self.outstanding,
            pool: self.pool.stats(),
        }
    }

    /// Obtains a core and hands `body` to the executor.
    ///
    /// On rejection the core goes straight back to the pool and the executor
    /// error is returned.
    pub(crate) fn submit<F>(&mut self, body: F) -> Result<Arc<TaskCore>, SpoolError>
    where
        F: FnOnce(&TaskContext<P>) -> Option<O> + Send + 'static,
    {
        let core = self.pool.obtain();

        let progress_tx = self.tx.clone();
        let progress: ProgressFn<P> = Box::new(move |task, value| {
            progress_tx.send(Notification::Progress { task, value }).is_ok()
        });
        let lifecycle = Arc::clone(&self.lifecycle);
        let handoff = Arc::new(AtomicU8::new(JOB_PENDING));
        let mut guard = JobGuard {
            core: Some(Arc::clone(&core)),
            handoff: Arc::clone(&handoff),
            tx: self.tx.clone(),
        };

        let job: Job = Box::new(move || {
            let Some(worker_core) = guard.disarm() else {
                return;
            };
            let finish_tx = guard.tx.clone();
            task::run(worker_core, lifecycle, progress, body, move |task, result| {
                // receiver gone means the loader was dropped; nothing to notify
                let _ = finish_tx.send(Notification::Finished { task, result });
            });
        });

        if let Err(e) = self.executor.execute(job) {
            error!(task = %core.id(), error = %e, "executor rejected task");
            self.pool.recycle(core);
            return Err(e.into());
        }

        let dropped_during_execute = handoff
            .compare_exchange(JOB_PENDING, JOB_ACCEPTED, Ordering::AcqRel, Ordering::Acquire)
            .is_err();
        if dropped_during_execute {
            warn!(task = %core.id(), "executor accepted job but dropped it");
            let _ = self.tx.send(Notification::Finished {
                task: core.id(),
                result: None,
            });
        }

        self.outstanding += 1;
        Ok(core)
    }

    /// Returns the core of a task whose final notification was dispatched.
    pub(crate) fn finish(&mut self, core: Arc<TaskCore>) {
        self.outstanding = self.outstanding.saturating_sub(1);
        self.pool.recycle(core);
    }

    pub(crate) async fn recv(&mut self) -> Option<Notification<P, O>> {
        self.rx.recv().await
    }

    pub(crate) fn try_recv(&mut self) -> Option<Notification<P, O>> {
        self.rx.try_recv().ok()
    }
}

impl<K, P, O> Drop for Loader<K, P, O> {
    fn drop(&mut self) {
        // paused workers would otherwise wait forever
        self.lifecycle.shutdown();
    }
}
