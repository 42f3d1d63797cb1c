//! BlockingPoolExecutor - tokio の blocking pool でロード本体を実行
//!
//! ロード本体はブロッキング I/O（ファイル・ダウンロード）なので、
//! async タスクではなく `spawn_blocking` で走らせます。
//! 同時実行数は Semaphore で制限し、満杯なら待たずにエラーを返します。
//! ランタイムが止まった後の投入も `Shutdown` エラーになります。

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{Semaphore, TryAcquireError, oneshot};
use tracing::trace;

use crate::config::ExecutorConfig;
use crate::ports::{Executor, ExecutorError, Job};

/// Bounded executor on top of the tokio blocking thread pool.
///
/// A permit is held from submission until the job returns. Submissions beyond
/// `capacity` fail with [`ExecutorError::Saturated`]; after [`close`], or once
/// the runtime behind `handle` has shut down, they fail with
/// [`ExecutorError::Shutdown`].
///
/// [`close`]: BlockingPoolExecutor::close
#[derive(Debug, Clone)]
pub struct BlockingPoolExecutor {
    handle: Handle,
    permits: Arc<Semaphore>,
    capacity: usize,
    /// Receiver side lives in a task on the runtime and is dropped with it.
    runtime_alive: Arc<oneshot::Sender<()>>,
}

impl BlockingPoolExecutor {
    pub fn new(handle: Handle, capacity: usize) -> Self {
        let (runtime_alive, watch) = oneshot::channel::<()>();
        handle.spawn(async move {
            let _ = watch.await;
        });
        Self {
            handle,
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            runtime_alive: Arc::new(runtime_alive),
        }
    }

    /// Uses the runtime of the calling context.
    ///
    /// Panics outside a tokio runtime, like [`Handle::current`].
    pub fn current(config: &ExecutorConfig) -> Self {
        Self::new(Handle::current(), config.max_in_flight)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held by a job.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// False once the runtime has shut down and would drop new jobs.
    pub fn is_runtime_alive(&self) -> bool {
        !self.runtime_alive.is_closed()
    }

    /// Refuses all further submissions. Running jobs are not affected.
    pub fn close(&self) {
        self.permits.close();
    }
}

impl Executor for BlockingPoolExecutor {
    fn execute(&self, job: Job) -> Result<(), ExecutorError> {
        if !self.is_runtime_alive() {
            return Err(ExecutorError::Shutdown);
        }
        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                return Err(ExecutorError::Saturated {
                    capacity: self.capacity,
                });
            }
            Err(TryAcquireError::Closed) => return Err(ExecutorError::Shutdown),
        };

        trace!(available = self.permits.available_permits(), "job submitted");
        self.handle.spawn_blocking(move || {
            let _permit = permit;
            job();
        });
        Ok(())
    }
}
