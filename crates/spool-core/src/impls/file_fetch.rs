//! FetchRequest that copies a local file.
//!
//! Stands in for a network download: the CLI uses it to mirror a file into the
//! cache, and tests use it to drive the cache protocol without a server.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::SpoolError;
use crate::ports::{Cancelable, FetchRequest, StatusCode};

const CHUNK_SIZE: usize = 8192;

#[derive(Debug, Clone)]
pub struct FileFetchRequest {
    source: PathBuf,
}

impl FileFetchRequest {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

impl FetchRequest for FileFetchRequest {
    /// Missing source maps to `404`. Cancellation between chunks stops the copy
    /// with [`SpoolError::Cancelled`].
    fn download(&self, dest: &Path, cancel: &dyn Cancelable) -> Result<StatusCode, SpoolError> {
        let mut src = match File::open(&self.source) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(source = %self.source.display(), "source not found");
                return Ok(StatusCode::NOT_FOUND);
            }
            Err(e) => return Err(e.into()),
        };
        let mut out = File::create(dest)?;
        let mut buf = [0u8; CHUNK_SIZE];

        loop {
            if cancel.is_cancelled() {
                return Err(SpoolError::Cancelled);
            }
            let n = match src.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            out.write_all(&buf[..n])?;
        }
        out.flush()?;
        Ok(StatusCode::OK)
    }
}
