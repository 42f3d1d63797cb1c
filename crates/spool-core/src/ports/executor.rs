//! Executor port - タスク本体を実行するスレッドの抽象化
//!
//! エンジン自身はスレッドを作りません。ワーカーはすべて Executor が提供します。
//!
//! # 実装
//! - **BlockingPoolExecutor**: tokio の blocking pool + Semaphore（本番用）
//! - **InlineExecutor**: 呼び出し元スレッドでそのまま実行（テスト用）

use thiserror::Error;

/// A unit of work handed to an executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs submitted jobs asynchronously.
///
/// Rejection must be visible to the caller: an executor that cannot accept
/// more work returns an error instead of dropping the job.
pub trait Executor: Send + Sync {
    fn execute(&self, job: Job) -> Result<(), ExecutorError>;
}

/// Errors that can occur when submitting a job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    #[error("executor saturated (capacity={capacity})")]
    Saturated { capacity: usize },

    #[error("executor shut down")]
    Shutdown,
}

impl<E: Executor + ?Sized> Executor for std::sync::Arc<E> {
    fn execute(&self, job: Job) -> Result<(), ExecutorError> {
        (**self).execute(job)
    }
}
