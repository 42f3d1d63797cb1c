//! Observability - ローダーの状態スナップショット
//!
//! ログは tracing で出します。ここでは、その時点の状態を
//! JSON にできる形でまとめるだけです。

use serde::{Deserialize, Serialize};

use crate::domain::LoaderState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub idle: usize,
    /// Elements built by the factory.
    pub created: u64,
    /// Obtains served from the idle list.
    pub reused: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderSnapshot {
    pub state: LoaderState,
    /// Keys with a registered task.
    pub registered: usize,
    /// Submitted tasks whose final notification was not dispatched yet.
    pub in_flight: usize,
    pub pool: PoolStats,
}
