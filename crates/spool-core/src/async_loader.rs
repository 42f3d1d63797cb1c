//! AsyncTaskLoader - キー単位の非同期ロード
//!
//! `load(key, params)` でバックグラウンドにロードを投げ、
//! 結果はコンシューマー側で `dispatch` されたときに
//! `LoadListener` のコールバックとして届きます。
//!
//! # 保証
//! - 同じキーで同時に走るタスクは一つだけ（重複時の扱いは DuplicatePolicy）
//! - 受理された load には、最終コールバック（complete / cancelled）が高々一回
//! - progress は同じタスクの最終コールバックより前に届く
//! - shutdown 後はコールバックを一切呼ばない

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::LoaderConfig;
use crate::domain::{LoadStatus, LoaderState, Notification, RejectReason, TaskId};
use crate::error::SpoolError;
use crate::loader::Loader;
use crate::observability::LoaderSnapshot;
use crate::policy::{DuplicateDecision, DuplicatePolicy};
use crate::ports::{Executor, OwnerLiveness};
use crate::task::{TaskContext, TaskCore};

/// The work done on a worker thread for each load.
pub trait LoadHandler: Send + Sync + 'static {
    type Key: Eq + Hash + Clone + Debug + Send + Sync + 'static;
    type Params: Send + Sync + 'static;
    type Progress: Send + 'static;
    type Output: Send + 'static;

    /// Produces the result for `key`, or `None` when there is nothing to
    /// deliver. Should poll `ctx.is_cancelled()` at reasonable points.
    fn load_in_background(
        &self,
        ctx: &TaskContext<Self::Progress>,
        key: &Self::Key,
        params: &Self::Params,
    ) -> Option<Self::Output>;
}

/// Callbacks invoked on the consumer while dispatching notifications.
pub trait LoadListener<H: LoadHandler> {
    /// A load was accepted; called before it is handed to the executor.
    fn on_start_loading(&mut self, _key: &H::Key, _params: &H::Params) {}

    fn on_progress_update(&mut self, _key: &H::Key, _params: &H::Params, _value: H::Progress) {}

    fn on_load_complete(&mut self, key: &H::Key, params: &H::Params, result: Option<H::Output>);

    /// The task was cancelled; `result` is whatever the body still returned.
    fn on_load_cancelled(
        &mut self,
        _key: &H::Key,
        _params: &H::Params,
        _result: Option<H::Output>,
    ) {
    }
}

struct LoadTask<K, P> {
    key: K,
    params: Arc<P>,
    core: Arc<TaskCore>,
}

/// Loader with a duplicate policy and per-load callbacks.
pub struct AsyncTaskLoader<H: LoadHandler, L> {
    loader: Loader<H::Key, H::Progress, H::Output>,
    handler: Arc<H>,
    listener: L,
    policy: Box<dyn DuplicatePolicy<H::Key>>,
    owner: Option<Box<dyn OwnerLiveness>>,
    in_flight: HashMap<TaskId, LoadTask<H::Key, H::Params>>,
}

impl<H, L> AsyncTaskLoader<H, L>
where
    H: LoadHandler,
    L: LoadListener<H>,
{
    /// Loader with the default configuration (`RejectNew`, pool of 8).
    pub fn new(executor: Arc<dyn Executor>, handler: H, listener: L) -> Self {
        Self::with_config(executor, handler, listener, &LoaderConfig::default_v1())
    }

    pub fn with_config(
        executor: Arc<dyn Executor>,
        handler: H,
        listener: L,
        config: &LoaderConfig,
    ) -> Self {
        Self {
            loader: Loader::new(executor, config.pool_capacity),
            handler: Arc::new(handler),
            listener,
            policy: config.policy(),
            owner: None,
            in_flight: HashMap::new(),
        }
    }

    pub fn with_policy(mut self, policy: impl DuplicatePolicy<H::Key> + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Progress and completion callbacks are skipped while `owner` reports it
    /// is gone. Cancellation callbacks are always delivered.
    pub fn set_owner(&mut self, owner: impl OwnerLiveness + 'static) {
        self.owner = Some(Box::new(owner));
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    fn owner_alive(&self) -> bool {
        self.owner.as_ref().is_none_or(|owner| owner.is_alive())
    }

    /// Starts a background load for `key`.
    ///
    /// Returns `Rejected` when the loader is shut down or the duplicate policy
    /// keeps the running task. Executor rejection is an error; nothing is
    /// registered in that case, although `on_start_loading` has already run.
    pub fn load(&mut self, key: H::Key, params: H::Params) -> Result<LoadStatus, SpoolError> {
        if self.loader.is_shutdown() {
            debug!(?key, "loader shut down, load ignored");
            return Ok(LoadStatus::Rejected(RejectReason::Shutdown));
        }

        if let Some(running) = self.loader.registry().get(&key)
            && !running.is_cancelled()
        {
            match self.policy.decide(&key, running) {
                DuplicateDecision::Reject => {
                    debug!(?key, task = %running.id(), "task already running, load rejected");
                    return Ok(LoadStatus::Rejected(RejectReason::Duplicate));
                }
                DuplicateDecision::Supersede { may_interrupt } => {
                    debug!(?key, task = %running.id(), may_interrupt, "superseding running task");
                    self.loader.cancel_task(&key, may_interrupt);
                }
            }
        }

        let params = Arc::new(params);
        let handler = Arc::clone(&self.handler);
        let body_key = key.clone();
        let body_params = Arc::clone(&params);

        self.listener.on_start_loading(&key, &params);
        let core = self.loader.submit(move |ctx| {
            ctx.wait_resume_if_paused();
            if ctx.is_cancelled() {
                return None;
            }
            handler.load_in_background(ctx, &body_key, &body_params)
        })?;

        let id = core.id();
        // a cancelled entry for the same key may still be there
        self.loader.registry_mut().insert(key.clone(), Arc::clone(&core));
        self.in_flight.insert(id, LoadTask { key, params, core });
        debug!(task = %id, "load submitted");

        Ok(LoadStatus::Submitted(id))
    }

    /// Runs the load body on the calling thread and returns its result.
    ///
    /// Bypasses the registry, the pool and the callbacks.
    pub fn load_sync(&self, key: &H::Key, params: &H::Params) -> Option<H::Output> {
        if self.loader.is_shutdown() {
            return None;
        }
        let ctx = TaskContext::detached(Arc::clone(self.loader.lifecycle()));
        self.handler.load_in_background(&ctx, key, params)
    }

    /// Delivers one worker notification to the listener.
    pub fn dispatch(&mut self, notification: Notification<H::Progress, H::Output>) {
        match notification {
            Notification::Progress { task, value } => {
                if self.loader.is_shutdown() {
                    return;
                }
                let alive = self.owner_alive();
                let Some(record) = self.in_flight.get(&task) else {
                    warn!(task = %task, "progress for unknown task");
                    return;
                };
                if alive {
                    self.listener
                        .on_progress_update(&record.key, &record.params, value);
                }
            }
            Notification::Finished { task, result } => {
                let Some(record) = self.in_flight.remove(&task) else {
                    warn!(task = %task, "finish for unknown task");
                    return;
                };
                if !self.loader.is_shutdown() {
                    self.loader.registry_mut().remove_if_current(&record.key, task);
                    if record.core.is_cancelled() {
                        debug!(task = %task, "load cancelled");
                        self.listener
                            .on_load_cancelled(&record.key, &record.params, result);
                    } else if self.owner_alive() {
                        self.listener
                            .on_load_complete(&record.key, &record.params, result);
                    } else {
                        debug!(task = %task, "owner gone, result dropped");
                    }
                }
                self.loader.finish(record.core);
            }
        }
    }

    /// Waits for the next notification and dispatches it.
    /// Returns `false` if the channel is closed.
    pub async fn dispatch_next(&mut self) -> bool {
        match self.loader.recv().await {
            Some(notification) => {
                self.dispatch(notification);
                true
            }
            None => false,
        }
    }

    /// Dispatches every notification already queued, without waiting.
    pub fn dispatch_pending(&mut self) -> usize {
        let mut dispatched = 0;
        while let Some(notification) = self.loader.try_recv() {
            self.dispatch(notification);
            dispatched += 1;
        }
        dispatched
    }

    /// Dispatches until every submitted task has delivered its final
    /// notification.
    pub async fn run_until_idle(&mut self) {
        while !self.in_flight.is_empty() {
            if !self.dispatch_next().await {
                break;
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_loading(&self, key: &H::Key) -> bool {
        self.loader.registry().is_loading(key)
    }

    pub fn cancel_task(&mut self, key: &H::Key, may_interrupt: bool) -> bool {
        self.loader.cancel_task(key, may_interrupt)
    }

    /// True once the loader is shut down or the in-flight task `task` was
    /// cancelled. Unknown tasks count as not cancelled.
    pub fn is_task_cancelled(&self, task: TaskId) -> bool {
        match self.in_flight.get(&task) {
            Some(record) => self.loader.is_task_cancelled(&record.core),
            None => self.loader.is_shutdown(),
        }
    }

    pub fn pause(&self) {
        self.loader.pause();
    }

    pub fn resume(&self) {
        self.loader.resume();
    }

    pub fn shutdown(&mut self) {
        self.loader.shutdown();
    }

    pub fn is_shutdown(&self) -> bool {
        self.loader.is_shutdown()
    }

    pub fn state(&self) -> LoaderState {
        self.loader.state()
    }

    pub fn snapshot(&self) -> LoaderSnapshot {
        self.loader.snapshot()
    }
}

impl<H, L> AsyncTaskLoader<H, L>
where
    H: LoadHandler + Default,
    L: LoadListener<H>,
{
    pub fn with_listener(executor: Arc<dyn Executor>, listener: L) -> Self {
        Self::new(executor, H::default(), listener)
    }
}
