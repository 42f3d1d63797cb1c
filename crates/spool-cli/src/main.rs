//! spool - キャッシュ付き JSON ロードを一回実行する CLI
//!
//! ```text
//! spool load --source remote.json --cache cache/feed.json
//! spool snapshot --source remote.json --cache cache/feed.json
//! ```

mod logging;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use spool_core::impls::{BlockingPoolExecutor, FileFetchRequest};
use spool_core::ports::{CacheParams, Cancelable};
use spool_core::{
    CacheLoadHandler, CacheLoader, CacheOutcome, LoadListener, LoadStatus, SpoolConfig, SpoolError,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "spool", about = "Cache-backed loader", version)]
struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a JSON resource through the cache and print what the consumer sees
    Load(LoadArgs),
    /// Run the same load silently and print the loader snapshot as JSON
    Snapshot(LoadArgs),
}

#[derive(Args)]
struct LoadArgs {
    /// File standing in for the remote resource
    #[arg(long)]
    source: PathBuf,

    /// Cache file; without it the load is uncached
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Key used for de-duplication and logging
    #[arg(long, default_value = "default")]
    key: String,

    /// JSON config file (defaults apply to missing fields)
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Fetches `source`, caches into `cache`, parses as JSON.
struct JsonFileParams {
    source: PathBuf,
    cache: Option<PathBuf>,
}

impl CacheParams for JsonFileParams {
    type Key = String;
    type Output = Value;
    type Request = FileFetchRequest;

    fn cache_file(&self, _key: &String) -> Option<PathBuf> {
        self.cache.clone()
    }

    fn new_fetch_request(&self, _key: &String) -> Result<FileFetchRequest, SpoolError> {
        Ok(FileFetchRequest::new(&self.source))
    }

    fn parse_result(
        &self,
        _key: &String,
        file: &Path,
        cancel: &dyn Cancelable,
    ) -> Result<Option<Value>, SpoolError> {
        let bytes = fs::read(file)?;
        if cancel.is_cancelled() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

/// Prints each callback as one line on stdout.
struct Printer {
    echo: bool,
    finished: bool,
}

impl Printer {
    fn print(&self, line: String) {
        if self.echo {
            println!("{line}");
        }
    }
}

impl LoadListener<CacheLoadHandler<JsonFileParams>> for Printer {
    fn on_start_loading(&mut self, key: &String, _: &JsonFileParams) {
        self.print(format!("start     {key}"));
    }

    fn on_progress_update(&mut self, key: &String, _: &JsonFileParams, value: Value) {
        self.print(format!("cached    {key} {value}"));
    }

    fn on_load_complete(
        &mut self,
        key: &String,
        _: &JsonFileParams,
        result: Option<CacheOutcome<Value>>,
    ) {
        self.finished = true;
        match result {
            Some(CacheOutcome::Loaded(value)) => self.print(format!("loaded    {key} {value}")),
            Some(CacheOutcome::NotModified) => self.print(format!("unchanged {key}")),
            None => self.print(format!("failed    {key}")),
        }
    }

    fn on_load_cancelled(
        &mut self,
        key: &String,
        _: &JsonFileParams,
        _: Option<CacheOutcome<Value>>,
    ) {
        self.finished = true;
        self.print(format!("cancelled {key}"));
    }
}

async fn run_load(args: LoadArgs, echo: bool) -> Result<CacheLoader<JsonFileParams, Printer>> {
    let config = match &args.config {
        Some(path) => SpoolConfig::from_path(path)?,
        None => SpoolConfig::default_v1(),
    };

    let executor = BlockingPoolExecutor::current(&config.executor);
    let printer = Printer {
        echo,
        finished: false,
    };
    let mut loader = CacheLoader::with_config(
        Arc::new(executor),
        CacheLoadHandler::new(),
        printer,
        &config.loader,
    );

    let params = JsonFileParams {
        source: args.source,
        cache: args.cache,
    };
    match loader.load(args.key.clone(), params)? {
        LoadStatus::Submitted(task) => info!(%task, key = %args.key, "load submitted"),
        LoadStatus::Rejected(reason) => bail!("load rejected: {reason:?}"),
    }

    loader.run_until_idle().await;
    if !loader.listener().finished {
        bail!("loader stopped before the load finished");
    }
    Ok(loader)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    match cli.command {
        Command::Load(args) => {
            let mut loader = run_load(args, true).await?;
            loader.shutdown();
        }
        Command::Snapshot(args) => {
            let mut loader = run_load(args, false).await?;
            let snapshot = serde_json::to_string_pretty(&loader.snapshot())
                .context("serialize snapshot")?;
            println!("{snapshot}");
            loader.shutdown();
        }
    }
    Ok(())
}
