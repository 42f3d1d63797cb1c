//! End-to-end behaviour of cache-backed loads against real files.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use serde_json::{Value, json};
use spool_core::impls::{BlockingPoolExecutor, FileFetchRequest, InlineExecutor};
use spool_core::ports::{CacheParams, Cancelable, ExecutorError, FetchRequest, StatusCode};
use spool_core::{
    CacheLoadHandler, CacheLoader, CacheOutcome, LoadListener, LoadStatus, RejectReason,
    ReplaceRunning, SpoolError,
};
use tempfile::TempDir;
use tokio::runtime::Handle;

/// "Remote" files live in `remote/`, cache files in `cache/`.
struct JsonParams {
    remote: PathBuf,
    cache: Option<PathBuf>,
    temp: PathBuf,
}

impl CacheParams for JsonParams {
    type Key = String;
    type Output = Value;
    type Request = FileFetchRequest;

    fn cache_file(&self, key: &String) -> Option<PathBuf> {
        self.cache.as_ref().map(|dir| dir.join(format!("{key}.json")))
    }

    fn new_fetch_request(&self, key: &String) -> Result<FileFetchRequest, SpoolError> {
        Ok(FileFetchRequest::new(self.remote.join(format!("{key}.json"))))
    }

    fn parse_result(
        &self,
        _key: &String,
        file: &Path,
        _cancel: &dyn Cancelable,
    ) -> Result<Option<Value>, SpoolError> {
        let bytes = fs::read(file)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn temp_dir(&self) -> PathBuf {
        self.temp.clone()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Start(String),
    Progress(String, Value),
    Complete(String, Option<CacheOutcome<Value>>),
    Cancelled(String),
}

#[derive(Default)]
struct Recorder(Vec<Event>);

impl Recorder {
    fn finals(&self, key: &str) -> usize {
        self.0
            .iter()
            .filter(|e| matches!(e, Event::Complete(k, _) | Event::Cancelled(k) if k == key))
            .count()
    }
}

impl<C> LoadListener<CacheLoadHandler<C>> for Recorder
where
    C: CacheParams<Key = String, Output = Value>,
{
    fn on_start_loading(&mut self, key: &String, _: &C) {
        self.0.push(Event::Start(key.clone()));
    }

    fn on_progress_update(&mut self, key: &String, _: &C, value: Value) {
        self.0.push(Event::Progress(key.clone(), value));
    }

    fn on_load_complete(&mut self, key: &String, _: &C, result: Option<CacheOutcome<Value>>) {
        self.0.push(Event::Complete(key.clone(), result));
    }

    fn on_load_cancelled(&mut self, key: &String, _: &C, _: Option<CacheOutcome<Value>>) {
        self.0.push(Event::Cancelled(key.clone()));
    }
}

/// Writes the start of a document, reports where, then holds the download
/// open until the task is cancelled.
struct StallingFetch {
    started: mpsc::Sender<PathBuf>,
}

impl FetchRequest for StallingFetch {
    fn download(&self, dest: &Path, cancel: &dyn Cancelable) -> Result<StatusCode, SpoolError> {
        fs::write(dest, br#"{"v":"#)?;
        let _ = self.started.send(dest.to_path_buf());
        while !cancel.is_cancelled() {
            thread::park_timeout(Duration::from_millis(20));
        }
        Err(SpoolError::Cancelled)
    }
}

struct StallingParams {
    cache: PathBuf,
    started: mpsc::Sender<PathBuf>,
}

impl CacheParams for StallingParams {
    type Key = String;
    type Output = Value;
    type Request = StallingFetch;

    fn cache_file(&self, key: &String) -> Option<PathBuf> {
        Some(self.cache.join(format!("{key}.json")))
    }

    fn new_fetch_request(&self, _key: &String) -> Result<StallingFetch, SpoolError> {
        Ok(StallingFetch {
            started: self.started.clone(),
        })
    }

    fn parse_result(
        &self,
        _key: &String,
        file: &Path,
        _cancel: &dyn Cancelable,
    ) -> Result<Option<Value>, SpoolError> {
        Ok(Some(serde_json::from_slice(&fs::read(file)?)?))
    }
}

struct Fixture {
    root: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        for dir in ["remote", "cache", "tmp"] {
            fs::create_dir(root.path().join(dir)).unwrap();
        }
        Self { root }
    }

    fn dir(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }

    fn params(&self) -> JsonParams {
        JsonParams {
            remote: self.dir("remote"),
            cache: Some(self.dir("cache")),
            temp: self.dir("tmp"),
        }
    }

    fn uncached_params(&self) -> JsonParams {
        JsonParams {
            cache: None,
            ..self.params()
        }
    }

    fn remote(&self, key: &str, body: &str) {
        fs::write(self.dir("remote").join(format!("{key}.json")), body).unwrap();
    }

    fn cache(&self, key: &str, body: &str) {
        fs::write(self.cache_path(key), body).unwrap();
    }

    fn cache_path(&self, key: &str) -> PathBuf {
        self.dir("cache").join(format!("{key}.json"))
    }

    fn cache_bytes(&self, key: &str) -> Vec<u8> {
        fs::read(self.cache_path(key)).unwrap()
    }

    /// Files in `dir` other than the cache files themselves.
    fn leftovers(&self, dir: &str) -> Vec<String> {
        fs::read_dir(self.dir(dir))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| !name.ends_with(".json"))
            .collect()
    }
}

fn inline_loader() -> CacheLoader<JsonParams, Recorder> {
    CacheLoader::with_listener(Arc::new(InlineExecutor), Recorder::default())
}

fn pooled_loader(capacity: usize) -> CacheLoader<JsonParams, Recorder> {
    let executor = BlockingPoolExecutor::new(Handle::current(), capacity);
    CacheLoader::with_listener(Arc::new(executor), Recorder::default())
}

#[test]
fn uncached_load_returns_parsed_value_and_cleans_up() {
    let fx = Fixture::new();
    fx.remote("A", r#"{"v":1}"#);
    let mut loader = inline_loader();

    loader.load("A".into(), fx.uncached_params()).unwrap();
    loader.dispatch_pending();

    assert_eq!(
        loader.listener().0,
        vec![
            Event::Start("A".into()),
            Event::Complete("A".into(), Some(CacheOutcome::Loaded(json!({"v": 1})))),
        ]
    );
    assert!(fx.leftovers("tmp").is_empty());
}

#[test]
fn unchanged_remote_yields_not_modified_twice() {
    let fx = Fixture::new();
    fx.cache("B", r#"{"v":1}"#);
    fx.remote("B", r#"{"v":1}"#);
    let mut loader = inline_loader();

    for _ in 0..2 {
        loader.load("B".into(), fx.params()).unwrap();
        loader.dispatch_pending();
    }

    let expected_round = [
        Event::Start("B".into()),
        Event::Progress("B".into(), json!({"v": 1})),
        Event::Complete("B".into(), Some(CacheOutcome::NotModified)),
    ];
    assert_eq!(loader.listener().0, [expected_round.clone(), expected_round].concat());
    assert_eq!(fx.cache_bytes("B"), br#"{"v":1}"#);
    assert!(fx.leftovers("cache").is_empty());
}

#[test]
fn changed_remote_is_promoted_into_cache() {
    let fx = Fixture::new();
    fx.cache("B", r#"{"v":1}"#);
    fx.remote("B", r#"{"v":2}"#);
    let mut loader = inline_loader();

    loader.load("B".into(), fx.params()).unwrap();
    loader.dispatch_pending();

    assert_eq!(
        loader.listener().0[1..],
        [
            Event::Progress("B".into(), json!({"v": 1})),
            Event::Complete("B".into(), Some(CacheOutcome::Loaded(json!({"v": 2})))),
        ]
    );
    assert_eq!(fx.cache_bytes("B"), br#"{"v":2}"#);
    assert!(fx.leftovers("cache").is_empty());
}

#[test]
fn first_load_without_cache_file_creates_it() {
    let fx = Fixture::new();
    fx.remote("fresh", r#"{"v":3}"#);
    let mut loader = inline_loader();

    loader.load("fresh".into(), fx.params()).unwrap();
    loader.dispatch_pending();

    // no progress: there was nothing cached to show
    assert_eq!(
        loader.listener().0,
        vec![
            Event::Start("fresh".into()),
            Event::Complete("fresh".into(), Some(CacheOutcome::Loaded(json!({"v": 3})))),
        ]
    );
    assert_eq!(fx.cache_bytes("fresh"), br#"{"v":3}"#);
}

#[test]
fn unparsable_download_leaves_cache_untouched() {
    let fx = Fixture::new();
    fx.cache("B", r#"{"v":1}"#);
    fx.remote("B", "<html>502</html>");
    let mut loader = inline_loader();

    loader.load("B".into(), fx.params()).unwrap();
    loader.dispatch_pending();

    assert_eq!(
        loader.listener().0.last(),
        Some(&Event::Complete("B".into(), None))
    );
    assert_eq!(fx.cache_bytes("B"), br#"{"v":1}"#);
    assert!(fx.leftovers("cache").is_empty());
}

#[test]
fn corrupt_cache_is_a_miss_not_a_failure() {
    let fx = Fixture::new();
    fx.cache("B", "{ truncated");
    fx.remote("B", r#"{"v":2}"#);
    let mut loader = inline_loader();

    loader.load("B".into(), fx.params()).unwrap();
    loader.dispatch_pending();

    assert_eq!(
        loader.listener().0,
        vec![
            Event::Start("B".into()),
            Event::Complete("B".into(), Some(CacheOutcome::Loaded(json!({"v": 2})))),
        ]
    );
    assert_eq!(fx.cache_bytes("B"), br#"{"v":2}"#);
}

#[test]
fn missing_remote_gives_none_and_keeps_cache() {
    let fx = Fixture::new();
    fx.cache("gone", r#"{"v":1}"#);
    let mut loader = inline_loader();

    loader.load("gone".into(), fx.params()).unwrap();
    loader.dispatch_pending();

    assert_eq!(
        loader.listener().0.last(),
        Some(&Event::Complete("gone".into(), None))
    );
    assert_eq!(fx.cache_bytes("gone"), br#"{"v":1}"#);
    assert!(fx.leftovers("cache").is_empty());
}

#[test]
fn load_sync_runs_protocol_without_callbacks() {
    let fx = Fixture::new();
    fx.remote("A", r#"{"v":1}"#);
    let loader = inline_loader();

    let outcome = loader.load_sync(&"A".to_string(), &fx.params());
    assert_eq!(outcome, Some(CacheOutcome::Loaded(json!({"v": 1}))));
    assert!(loader.listener().0.is_empty());
    assert_eq!(fx.cache_bytes("A"), br#"{"v":1}"#);
}

#[tokio::test]
async fn duplicate_key_is_rejected_while_running() {
    let fx = Fixture::new();
    fx.remote("C", r#"{"v":1}"#);
    let mut loader = pooled_loader(4);

    // paused workers cannot finish before the second load arrives
    loader.pause();
    assert!(loader.load("C".into(), fx.params()).unwrap().is_submitted());
    assert_eq!(
        loader.load("C".into(), fx.params()).unwrap(),
        LoadStatus::Rejected(RejectReason::Duplicate)
    );
    loader.resume();
    loader.run_until_idle().await;

    assert_eq!(loader.listener().finals("C"), 1);
    assert!(!loader.is_loading(&"C".to_string()));
}

#[tokio::test]
async fn superseded_load_is_cancelled_and_leaves_no_temp_files() {
    let fx = Fixture::new();
    fx.cache("C", r#"{"v":1}"#);
    fx.remote("C", r#"{"v":2}"#);
    let mut loader = pooled_loader(4).with_policy(ReplaceRunning::default());

    loader.pause();
    let first = loader.load("C".into(), fx.params()).unwrap();
    let second = loader.load("C".into(), fx.params()).unwrap();
    assert_ne!(first, second);
    loader.resume();
    loader.run_until_idle().await;

    let events = &loader.listener().0;
    assert_eq!(
        events.iter().filter(|e| matches!(e, Event::Cancelled(_))).count(),
        1
    );
    // the two workers race after resume, so only membership is checked
    assert!(events.contains(&Event::Complete(
        "C".into(),
        Some(CacheOutcome::Loaded(json!({"v": 2})))
    )));
    assert_eq!(loader.listener().finals("C"), 2);
    assert_eq!(fx.cache_bytes("C"), br#"{"v":2}"#);
    assert!(fx.leftovers("cache").is_empty());
}

/// Starts a load of `S` whose download stalls, and waits until the partial
/// download is on disk.
async fn stalled_load(fx: &Fixture) -> (CacheLoader<StallingParams, Recorder>, PathBuf) {
    let (started_tx, started_rx) = mpsc::channel();
    let executor = BlockingPoolExecutor::new(Handle::current(), 4);
    let mut loader = CacheLoader::with_listener(Arc::new(executor), Recorder::default());
    let params = StallingParams {
        cache: fx.dir("cache"),
        started: started_tx,
    };

    assert!(loader.load("S".into(), params).unwrap().is_submitted());
    let partial =
        tokio::task::spawn_blocking(move || started_rx.recv_timeout(Duration::from_secs(5)))
            .await
            .unwrap()
            .unwrap();
    assert!(partial.exists());
    assert_eq!(partial.parent(), Some(fx.dir("cache").as_path()));
    (loader, partial)
}

#[tokio::test]
async fn cancelling_a_running_fetch_removes_the_partial_download() {
    let fx = Fixture::new();
    fx.cache("S", r#"{"v":1}"#);
    let (mut loader, partial) = stalled_load(&fx).await;

    assert!(loader.cancel_task(&"S".to_string(), true));
    loader.run_until_idle().await;

    assert_eq!(
        loader.listener().0,
        vec![
            Event::Start("S".into()),
            Event::Progress("S".into(), json!({"v": 1})),
            Event::Cancelled("S".into()),
        ]
    );
    assert!(!partial.exists());
    assert!(fx.leftovers("cache").is_empty());
    assert_eq!(fx.cache_bytes("S"), br#"{"v":1}"#);
    assert!(!loader.is_loading(&"S".to_string()));
}

#[tokio::test]
async fn shutdown_during_fetch_removes_the_partial_download() {
    let fx = Fixture::new();
    fx.cache("S", r#"{"v":1}"#);
    let (mut loader, partial) = stalled_load(&fx).await;

    loader.shutdown();
    loader.run_until_idle().await;

    assert_eq!(loader.listener().0, vec![Event::Start("S".into())]);
    assert!(!partial.exists());
    assert!(fx.leftovers("cache").is_empty());
    assert_eq!(fx.cache_bytes("S"), br#"{"v":1}"#);
}

#[tokio::test]
async fn saturated_executor_is_an_error_and_registers_nothing() {
    let fx = Fixture::new();
    fx.remote("one", r#"{"v":1}"#);
    fx.remote("two", r#"{"v":2}"#);
    let mut loader = pooled_loader(1);

    loader.pause();
    loader.load("one".into(), fx.params()).unwrap();
    let err = loader.load("two".into(), fx.params()).unwrap_err();

    assert!(matches!(
        err,
        SpoolError::Executor(ExecutorError::Saturated { capacity: 1 })
    ));
    assert!(!loader.is_loading(&"two".to_string()));
    assert_eq!(loader.in_flight(), 1);

    loader.resume();
    loader.run_until_idle().await;
    assert_eq!(loader.listener().finals("one"), 1);
    assert_eq!(loader.listener().finals("two"), 0);
}

#[tokio::test]
async fn shutdown_wakes_paused_workers_and_silences_callbacks() {
    let fx = Fixture::new();
    fx.cache("B", r#"{"v":1}"#);
    fx.remote("B", r#"{"v":2}"#);
    let mut loader = pooled_loader(4);

    loader.pause();
    loader.load("B".into(), fx.params()).unwrap();
    loader.shutdown();
    loader.run_until_idle().await;

    assert_eq!(loader.listener().0, vec![Event::Start("B".into())]);
    assert_eq!(fx.cache_bytes("B"), br#"{"v":1}"#);
    assert!(fx.leftovers("cache").is_empty());

    let snapshot = loader.snapshot();
    assert_eq!(snapshot.in_flight, 0);
    assert_eq!(snapshot.registered, 0);
}

#[tokio::test]
async fn cores_are_reused_across_loads() {
    let fx = Fixture::new();
    let mut loader = pooled_loader(4);

    for round in 0..5 {
        let key = format!("k{round}");
        fx.remote(&key, &format!(r#"{{"v":{round}}}"#));
        loader.load(key, fx.params()).unwrap();
        loader.run_until_idle().await;
    }

    let stats = loader.snapshot().pool;
    assert_eq!(stats.created + stats.reused, 5);
    assert!(stats.reused >= 1);
    assert_eq!(loader.listener().0.len(), 10);
}
