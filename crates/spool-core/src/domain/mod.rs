//! Domain model (IDs, lifecycle states, outcomes, notifications).

pub mod events;
pub mod ids;
pub mod outcome;
pub mod state;

pub use events::Notification;
pub use ids::TaskId;
pub use outcome::{CacheOutcome, LoadStatus, RejectReason};
pub use state::{LoaderState, TaskState};
