//! spool-core
//!
//! Core building blocks for the Spool loader engine.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, outcome, events）
//! - **ports**: 抽象化レイヤー（Executor, CacheParams / FetchRequest, OwnerLiveness, Cancelable）
//! - **impls**: 実装（BlockingPoolExecutor, InlineExecutor, FileFetchRequest）
//! - pool / task / registry: タスクの再利用・状態・実行中タスクの管理
//! - loader / async_loader / policy: エンジン本体と重複リクエストの扱い
//! - cache_load: キャッシュファイル付きロード（download → compare → promote）
//! - config / observability / error: 設定・スナップショット・エラー型

pub mod domain;
pub mod ports;
pub mod impls;

pub mod async_loader;
pub mod cache_load;
pub mod config;
pub mod error;
pub mod loader;
pub mod observability;
pub mod policy;
pub mod pool;
pub mod registry;
pub mod task;

pub use async_loader::{AsyncTaskLoader, LoadHandler, LoadListener};
pub use cache_load::{CacheLoadHandler, CacheLoader};
pub use config::{ExecutorConfig, LoaderConfig, PolicyKind, SpoolConfig};
pub use domain::{
    CacheOutcome, LoadStatus, LoaderState, Notification, RejectReason, TaskId, TaskState,
};
pub use error::SpoolError;
pub use loader::Loader;
pub use observability::{LoaderSnapshot, PoolStats};
pub use policy::{DuplicateDecision, DuplicatePolicy, RejectNew, ReplaceRunning};
pub use task::{TaskContext, TaskCore};
