//! Executor that runs every job on the submitting thread.

use crate::ports::{Executor, ExecutorError, Job};

/// Runs the job before `execute` returns.
///
/// Notifications still go through the loader channel, so callbacks only fire
/// when the consumer dispatches them.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, job: Job) -> Result<(), ExecutorError> {
        job();
        Ok(())
    }
}
