//! Fetch / parse collaborators for cache-backed loads.
//!
//! The engine never looks inside keys, files or results. It only calls the
//! three operations of [`CacheParams`] and the `download` of the request it
//! gets back.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::Cancelable;
use crate::error::SpoolError;

/// Status reported by a download.
///
/// Uses HTTP numbering; only `OK` counts as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200);
    pub const NOT_FOUND: StatusCode = StatusCode(404);

    pub fn is_ok(self) -> bool {
        self == StatusCode::OK
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A prepared download.
///
/// Timeouts (connect/read) are the request's business, not the engine's.
pub trait FetchRequest: Send {
    /// Writes the fetched bytes to `dest` and reports the status.
    ///
    /// Implementations should poll `cancel` between chunks and stop early.
    fn download(&self, dest: &Path, cancel: &dyn Cancelable) -> Result<StatusCode, SpoolError>;
}

impl<R: FetchRequest + ?Sized> FetchRequest for Box<R> {
    fn download(&self, dest: &Path, cancel: &dyn Cancelable) -> Result<StatusCode, SpoolError> {
        (**self).download(dest, cancel)
    }
}

/// Describes how to cache, fetch and parse the resource behind a key.
///
/// All methods run on a worker thread.
pub trait CacheParams: Send + Sync + 'static {
    type Key: Send + Sync;
    type Output: Send + 'static;
    type Request: FetchRequest;

    /// Path of the local cache file for `key`, or `None` when the resource is
    /// not cached at all.
    fn cache_file(&self, key: &Self::Key) -> Option<PathBuf>;

    fn new_fetch_request(&self, key: &Self::Key) -> Result<Self::Request, SpoolError>;

    /// Parses `file`. `Ok(None)` means the content was readable but rejected
    /// (e.g. failed validation).
    fn parse_result(
        &self,
        key: &Self::Key,
        file: &Path,
        cancel: &dyn Cancelable,
    ) -> Result<Option<Self::Output>, SpoolError>;

    /// Directory for temp files of uncached loads.
    fn temp_dir(&self) -> PathBuf {
        std::env::temp_dir()
    }
}
