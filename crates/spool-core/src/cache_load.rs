//! Cache-backed load: download → compare → promote
//!
//! # 流れ
//! - キャッシュなし: 一時ファイルへダウンロード → パース → 一時ファイル削除
//! - キャッシュあり:
//!   1. 既存キャッシュをパースできたら progress として即座に流す（hit cache）
//!   2. `<cache>.<worker>` へダウンロード
//!   3. hit cache かつバイト列が同じなら `NotModified`
//!   4. パースに成功したら一時ファイルをキャッシュへ rename（置き換え）
//!
//! どの経路で抜けても一時ファイルは残りません（`TempFile` の Drop で削除）。

use std::ffi::OsString;
use std::fmt::Debug;
use std::fs::{self, File};
use std::hash::Hash;
use std::io::{self, Read};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use tracing::{debug, error, warn};

use crate::async_loader::{AsyncTaskLoader, LoadHandler};
use crate::domain::{CacheOutcome, TaskId};
use crate::error::SpoolError;
use crate::ports::{CacheParams, FetchRequest};
use crate::task::TaskContext;

const COMPARE_CHUNK: usize = 8192;

/// Loader running the cache protocol for `C`.
pub type CacheLoader<C, L> = AsyncTaskLoader<CacheLoadHandler<C>, L>;

/// [`LoadHandler`] for cache-backed loads.
///
/// Progress carries the cached value on a cache hit; the final result is a
/// [`CacheOutcome`].
pub struct CacheLoadHandler<C> {
    _params: PhantomData<fn() -> C>,
}

impl<C> CacheLoadHandler<C> {
    pub fn new() -> Self {
        Self {
            _params: PhantomData,
        }
    }
}

impl<C> Default for CacheLoadHandler<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> LoadHandler for CacheLoadHandler<C>
where
    C: CacheParams,
    C::Key: Eq + Hash + Clone + Debug + 'static,
{
    type Key = C::Key;
    type Params = C;
    type Progress = C::Output;
    type Output = CacheOutcome<C::Output>;

    fn load_in_background(
        &self,
        ctx: &TaskContext<C::Output>,
        key: &C::Key,
        params: &C,
    ) -> Option<CacheOutcome<C::Output>> {
        load_cached(ctx, key, params)
    }
}

/// Runs the cache protocol for `key`. Errors are logged and become `None`.
pub fn load_cached<C>(
    ctx: &TaskContext<C::Output>,
    key: &C::Key,
    params: &C,
) -> Option<CacheOutcome<C::Output>>
where
    C: CacheParams,
    C::Key: Debug,
{
    match try_load_cached(ctx, key, params) {
        Ok(outcome) => outcome,
        Err(SpoolError::Cancelled) => {
            debug!(?key, "load cancelled during fetch");
            None
        }
        Err(e) => {
            error!(?key, error = %e, "couldn't load resource");
            None
        }
    }
}

fn try_load_cached<C>(
    ctx: &TaskContext<C::Output>,
    key: &C::Key,
    params: &C,
) -> Result<Option<CacheOutcome<C::Output>>, SpoolError>
where
    C: CacheParams,
    C::Key: Debug,
{
    let Some(cache_file) = params.cache_file(key) else {
        return load_uncached(ctx, key, params);
    };

    let hit_cache = publish_cached(ctx, key, params, &cache_file);
    if ctx.is_cancelled() {
        return Ok(None);
    }

    if let Some(parent) = cache_file.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp = TempFile::new(sibling_path(&cache_file, &ctx.worker_suffix()));
    if !download(ctx, key, params, temp.path())? {
        return Ok(None);
    }

    if hit_cache && files_equal(&cache_file, temp.path())? {
        debug!(?key, cache = %cache_file.display(), "cache unchanged");
        return Ok(Some(CacheOutcome::NotModified));
    }

    let Some(value) = params.parse_result(key, temp.path(), ctx)? else {
        warn!(?key, "downloaded content rejected, cache kept");
        return Ok(None);
    };
    if ctx.is_cancelled() {
        return Ok(None);
    }

    temp.persist(&cache_file)?;
    debug!(?key, cache = %cache_file.display(), "cache updated");
    Ok(Some(CacheOutcome::Loaded(value)))
}

fn load_uncached<C>(
    ctx: &TaskContext<C::Output>,
    key: &C::Key,
    params: &C,
) -> Result<Option<CacheOutcome<C::Output>>, SpoolError>
where
    C: CacheParams,
    C::Key: Debug,
{
    let dir = params.temp_dir();
    fs::create_dir_all(&dir)?;
    let id = ctx.task_id().unwrap_or_else(TaskId::generate);
    let name = format!("spool-{}.{}", id.as_ulid(), ctx.worker_suffix());
    let temp = TempFile::new(dir.join(name));

    if !download(ctx, key, params, temp.path())? {
        return Ok(None);
    }
    Ok(params
        .parse_result(key, temp.path(), ctx)?
        .map(CacheOutcome::Loaded))
}

/// Parses the existing cache file and publishes it as progress.
/// Returns whether the cache was usable.
fn publish_cached<C>(
    ctx: &TaskContext<C::Output>,
    key: &C::Key,
    params: &C,
    cache_file: &Path,
) -> bool
where
    C: CacheParams,
    C::Key: Debug,
{
    if !cache_file.exists() {
        return false;
    }
    match params.parse_result(key, cache_file, ctx) {
        Ok(Some(value)) => {
            ctx.set_progress(value);
            true
        }
        Ok(None) => false,
        Err(e) => {
            warn!(
                ?key,
                cache = %cache_file.display(),
                error = %e,
                "cache file unreadable, treated as miss"
            );
            false
        }
    }
}

/// Downloads into `dest`. `false` means "nothing usable": non-OK status or
/// cancelled.
fn download<C>(
    ctx: &TaskContext<C::Output>,
    key: &C::Key,
    params: &C,
    dest: &Path,
) -> Result<bool, SpoolError>
where
    C: CacheParams,
    C::Key: Debug,
{
    let request = params.new_fetch_request(key)?;
    let status = request.download(dest, ctx)?;
    if !status.is_ok() {
        warn!(?key, %status, "fetch failed");
        return Ok(false);
    }
    Ok(!ctx.is_cancelled())
}

/// `<path>.<suffix>`, next to `path`.
fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Byte-for-byte comparison. A missing file compares unequal.
pub fn files_equal(a: &Path, b: &Path) -> io::Result<bool> {
    let (len_a, len_b) = match (fs::metadata(a), fs::metadata(b)) {
        (Ok(ma), Ok(mb)) => (ma.len(), mb.len()),
        (Err(e), _) | (_, Err(e)) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        (Err(e), _) | (_, Err(e)) => return Err(e),
    };
    if len_a != len_b {
        return Ok(false);
    }

    let mut fa = File::open(a)?;
    let mut fb = File::open(b)?;
    let mut buf_a = [0u8; COMPARE_CHUNK];
    let mut buf_b = [0u8; COMPARE_CHUNK];
    loop {
        let n = fill(&mut fa, &mut buf_a)?;
        let m = fill(&mut fb, &mut buf_b)?;
        if buf_a[..n] != buf_b[..m] {
            return Ok(false);
        }
        if n == 0 {
            return Ok(true);
        }
    }
}

fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Temp file that is removed when dropped unless persisted.
struct TempFile {
    path: PathBuf,
    armed: bool,
}

impl TempFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// Renames the file over `dest`, replacing it.
    fn persist(mut self, dest: &Path) -> io::Result<()> {
        fs::rename(&self.path, dest)?;
        self.armed = false;
        Ok(())
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "couldn't remove temp file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn sibling_path_appends_suffix() {
        let p = sibling_path(Path::new("/cache/feed.json"), "1f");
        assert_eq!(p, PathBuf::from("/cache/feed.json.1f"));
    }

    #[test]
    fn files_equal_compares_content() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        let c = dir.path().join("c");
        let big = vec![7u8; COMPARE_CHUNK * 3 + 5];
        let mut other = big.clone();
        *other.last_mut().unwrap() = 8;
        fs::write(&a, &big).unwrap();
        fs::write(&b, &big).unwrap();
        fs::write(&c, &other).unwrap();

        assert!(files_equal(&a, &b).unwrap());
        assert!(!files_equal(&a, &c).unwrap());
        assert!(!files_equal(&a, &dir.path().join("missing")).unwrap());
    }

    #[test]
    fn files_of_different_length_differ() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, b"{\"v\":1}").unwrap();
        fs::write(&b, b"{\"v\":1}\n").unwrap();
        assert!(!files_equal(&a, &b).unwrap());
    }

    #[test]
    fn temp_file_is_removed_unless_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let dropped = dir.path().join("dropped.tmp");
        fs::write(&dropped, b"x").unwrap();
        drop(TempFile::new(dropped.clone()));
        assert!(!dropped.exists());

        // never created: dropping is still fine
        drop(TempFile::new(dir.path().join("never")));

        let kept = dir.path().join("kept.tmp");
        let dest = dir.path().join("dest");
        fs::write(&kept, b"new").unwrap();
        fs::write(&dest, b"old").unwrap();
        TempFile::new(kept.clone()).persist(&dest).unwrap();
        assert!(!kept.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"new");
    }
}
