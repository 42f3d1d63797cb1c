//! Task - 一回分のバックグラウンドロード
//!
//! `TaskCore` は状態（running / cancelled / completed）と、
//! 割り込み用のワーカースレッドを保持します。
//! `TaskContext` はロード本体に渡されるハンドルで、
//! キャンセル確認と progress 送信だけができます。

use std::any::Any;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, Thread};

use tracing::error;

use crate::domain::{TaskId, TaskState};
use crate::loader::Lifecycle;
use crate::ports::Cancelable;

/// Shared state of one submission.
///
/// The consumer and the worker both hold an `Arc<TaskCore>`. State changes go
/// through compare-and-swap, so exactly one of `cancel` and `complete` wins.
#[derive(Debug)]
pub struct TaskCore {
    id: TaskId,
    state: AtomicU8,
    runner: Mutex<Option<Thread>>,
    interrupted: AtomicBool,
}

impl TaskCore {
    pub(crate) fn new() -> Self {
        Self {
            id: TaskId::generate(),
            state: AtomicU8::new(TaskState::Running as u8),
            runner: Mutex::new(None),
            interrupted: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == TaskState::Running
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == TaskState::Cancelled
    }

    /// Attempts to cancel. Fails if the task already completed or was already
    /// cancelled.
    ///
    /// With `may_interrupt`, a worker currently running the body gets its
    /// interrupt flag set and is unparked.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        let cancelled = self.transition(TaskState::Cancelled);
        if cancelled && may_interrupt {
            self.interrupt();
        }
        cancelled
    }

    /// Whether the worker was interrupted by `cancel(true)`.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    pub(crate) fn complete(&self) -> bool {
        self.transition(TaskState::Completed)
    }

    fn transition(&self, to: TaskState) -> bool {
        self.state
            .compare_exchange(
                TaskState::Running as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn interrupt(&self) {
        let runner = self.runner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(thread) = runner.as_ref() {
            self.interrupted.store(true, Ordering::Release);
            thread.unpark();
        }
    }

    fn bind_runner(&self) {
        *self.runner.lock().unwrap_or_else(PoisonError::into_inner) = Some(thread::current());
    }

    fn unbind_runner(&self) {
        *self.runner.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub(crate) fn assign_id(&mut self, id: TaskId) {
        self.id = id;
    }

    /// Puts the core back to `Running`. Requires exclusive access, so no
    /// worker or registry can still observe it.
    pub(crate) fn clear_for_recycle(&mut self) {
        *self.runner.get_mut().unwrap_or_else(PoisonError::into_inner) = None;
        *self.state.get_mut() = TaskState::Running as u8;
        *self.interrupted.get_mut() = false;
    }
}

impl Cancelable for TaskCore {
    fn is_cancelled(&self) -> bool {
        TaskCore::is_cancelled(self)
    }
}

pub(crate) type ProgressFn<P> = Box<dyn Fn(TaskId, P) -> bool + Send + Sync>;

/// Handle passed to a load body.
pub struct TaskContext<P> {
    core: Option<Arc<TaskCore>>,
    lifecycle: Arc<Lifecycle>,
    progress: Option<ProgressFn<P>>,
}

impl<P> TaskContext<P> {
    /// Context for a synchronous load: no task, no progress.
    pub(crate) fn detached(lifecycle: Arc<Lifecycle>) -> Self {
        Self {
            core: None,
            lifecycle,
            progress: None,
        }
    }

    /// Id of the task this body runs for; `None` for synchronous loads.
    pub fn task_id(&self) -> Option<TaskId> {
        self.core.as_ref().map(|core| core.id())
    }

    /// True once the task was cancelled or the loader was shut down.
    pub fn is_cancelled(&self) -> bool {
        self.lifecycle.is_shutdown() || self.core.as_ref().is_some_and(|core| core.is_cancelled())
    }

    pub fn is_interrupted(&self) -> bool {
        self.core.as_ref().is_some_and(|core| core.is_interrupted())
    }

    /// Publishes an intermediate value to the consumer.
    ///
    /// Dropped (returns `false`) once the task is no longer running.
    pub fn set_progress(&self, value: P) -> bool {
        match (&self.core, &self.progress) {
            (Some(core), Some(send)) if core.is_running() => send(core.id(), value),
            _ => false,
        }
    }

    /// Short token identifying the current worker thread.
    ///
    /// Used to build temp file names that cannot collide between concurrent
    /// workers.
    pub fn worker_suffix(&self) -> String {
        let mut hasher = DefaultHasher::new();
        thread::current().id().hash(&mut hasher);
        format!("{:x}", hasher.finish())
    }

    pub(crate) fn wait_resume_if_paused(&self) {
        self.lifecycle.wait_resume_if_paused();
    }
}

impl<P> Cancelable for TaskContext<P> {
    fn is_cancelled(&self) -> bool {
        TaskContext::is_cancelled(self)
    }
}

/// Runs one task on the current (worker) thread.
///
/// The body is skipped when the task is no longer `Running`. The core reference
/// is dropped before `finish` is called, so the consumer can reclaim the core
/// as soon as it sees the final notification.
pub(crate) fn run<P, O, F, S>(
    core: Arc<TaskCore>,
    lifecycle: Arc<Lifecycle>,
    progress: ProgressFn<P>,
    body: F,
    finish: S,
) where
    F: FnOnce(&TaskContext<P>) -> Option<O>,
    S: FnOnce(TaskId, Option<O>),
{
    let id = core.id();
    let mut result = None;

    if core.is_running() {
        core.bind_runner();
        let ctx = TaskContext {
            core: Some(Arc::clone(&core)),
            lifecycle,
            progress: Some(progress),
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&ctx)));
        drop(ctx);
        core.unbind_runner();
        core.complete();

        result = match outcome {
            Ok(value) => value,
            Err(payload) => {
                error!(task = %id, "load body panicked: {}", panic_message(payload.as_ref()));
                None
            }
        };
    }

    drop(core);
    finish(id, result);
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
