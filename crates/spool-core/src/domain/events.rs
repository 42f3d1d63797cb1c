//! Notifications sent from worker threads to the single consumer.

use super::TaskId;

/// One message on the consumer channel.
///
/// Every task sends zero or more `Progress` messages followed by exactly one
/// `Finished`. Messages of one task arrive in that order; messages of
/// different tasks may interleave.
#[derive(Debug)]
pub enum Notification<P, O> {
    Progress { task: TaskId, value: P },
    Finished { task: TaskId, result: Option<O> },
}
