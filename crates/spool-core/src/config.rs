//! Config - ローダーとエグゼキューターの設定
//!
//! JSON で読み込み、足りない項目は `default_v1()` の値で埋めます。
//!
//! ```json
//! {
//!   "loader": { "pool_capacity": 8, "duplicate_policy": "reject_new" },
//!   "executor": { "max_in_flight": 64 }
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SpoolError;
use crate::policy::{DuplicatePolicy, RejectNew, ReplaceRunning};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpoolConfig {
    pub loader: LoaderConfig,
    pub executor: ExecutorConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Idle task cores kept for reuse. 0 disables pooling.
    pub pool_capacity: usize,

    pub duplicate_policy: PolicyKind,

    /// Only used with `replace_running`: interrupt the superseded worker.
    pub interrupt_on_replace: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    RejectNew,
    ReplaceRunning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum number of jobs running or waiting for a blocking thread.
    pub max_in_flight: usize,
}

impl SpoolConfig {
    pub fn default_v1() -> Self {
        Self {
            loader: LoaderConfig::default_v1(),
            executor: ExecutorConfig::default_v1(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, SpoolError> {
        let config: SpoolConfig =
            serde_json::from_str(json).map_err(|e| SpoolError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SpoolError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .map_err(|e| SpoolError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), SpoolError> {
        if self.executor.max_in_flight == 0 {
            return Err(SpoolError::Config(
                "executor.max_in_flight must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self::default_v1()
    }
}

impl LoaderConfig {
    /// Same size as the classic loader pool.
    pub fn default_v1() -> Self {
        Self {
            pool_capacity: 8,
            duplicate_policy: PolicyKind::RejectNew,
            interrupt_on_replace: false,
        }
    }

    /// Builds the configured duplicate policy.
    pub fn policy<K: 'static>(&self) -> Box<dyn DuplicatePolicy<K>> {
        match self.duplicate_policy {
            PolicyKind::RejectNew => Box::new(RejectNew),
            PolicyKind::ReplaceRunning => Box::new(ReplaceRunning {
                may_interrupt: self.interrupt_on_replace,
            }),
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self::default_v1()
    }
}

impl ExecutorConfig {
    pub fn default_v1() -> Self {
        Self { max_in_flight: 64 }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::default_v1()
    }
}
