mod cache;
mod config;
mod event;
mod http;
mod network;
mod server;
#[cfg(test)]
mod testing;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url::Url;

use cache::{CacheSource, CacheStorage, SqliteStorage};
use event::WorkerHandle;
use http::Request;
use network::{HttpNetwork, Network};
use worker::{FetchOutcome, LocalClients, ShellCacheWorker};

#[derive(Parser, Debug)]
#[command(name = "shellcache")]
#[command(about = "A network-first offline cache for a web dashboard's application shell")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/shellcache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Dashboard origin to fetch from
  #[arg(short, long, global = true)]
  upstream: Option<String>,

  /// Write logs to this file instead of stderr
  #[arg(long, global = true)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the shell and activate the current cache version
  Register,
  /// Register, then handle a single request and report where it was answered from
  Fetch {
    /// Request path, e.g. /static/icon-192.png
    path: String,
  },
  /// Register, then serve the dashboard through the cache
  Serve {
    /// Address to listen on
    #[arg(short, long)]
    listen: Option<String>,
  },
  /// List cache buckets
  Caches,
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  match log_file {
    Some(path) => {
      let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
      let name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
      let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));

      tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .with(filter)
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
      Ok(None)
    }
  }
}

type LocalWorker = ShellCacheWorker<Arc<SqliteStorage>, HttpNetwork, LocalClients>;

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_tracing(args.log_file.as_deref())?;

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override upstream if specified on command line
  let config = if let Some(upstream) = args.upstream {
    config::Config { upstream, ..config }
  } else {
    config
  };

  let origin = config.upstream_url()?;
  let storage = Arc::new(SqliteStorage::open_at(config.cache_path.as_deref())?);

  match args.command {
    Command::Caches => list_caches(storage.as_ref(), &config.worker.cache_name)?,
    Command::Register => {
      let (handle, _) = start_worker(&config, &origin, storage)?;
      handle.register().await?;
      println!("Cache '{}' installed and active", config.worker.cache_name);
    }
    Command::Fetch { path } => {
      let (handle, network) = start_worker(&config, &origin, storage)?;
      if let Err(e) = handle.register().await {
        warn!(error = %e, "registration failed, requests go straight to the network");
      }
      let request = Request::get_path(&origin, &path)?;
      fetch_once(&handle, network.as_ref(), request).await?;
    }
    Command::Serve { listen } => {
      let (handle, network) = start_worker(&config, &origin, storage)?;
      if let Err(e) = handle.register().await {
        warn!(error = %e, "registration failed, serving without the offline shell");
      }
      let listen = listen.unwrap_or(config.listen);
      server::serve(&listen, handle, network, origin).await?;
    }
  }

  info!("done");
  Ok(())
}

/// Build the worker for the configured version and start its event loop.
fn start_worker(
  config: &config::Config,
  origin: &Url,
  storage: Arc<SqliteStorage>,
) -> Result<(WorkerHandle, Arc<HttpNetwork>)> {
  let network = Arc::new(HttpNetwork::new()?);
  let worker: Arc<LocalWorker> = Arc::new(ShellCacheWorker::new(
    config.worker.clone(),
    origin.clone(),
    storage,
    Arc::clone(&network),
    LocalClients::new(),
  ));
  Ok((WorkerHandle::spawn(worker), network))
}

async fn fetch_once(handle: &WorkerHandle, network: &HttpNetwork, request: Request) -> Result<()> {
  let url = request.url.clone();
  let (source, cached_at, response) = match handle.fetch(request.clone()).await? {
    FetchOutcome::Respond(result) => (Some(result.source), result.cached_at, result.data),
    FetchOutcome::Passthrough => (None, None, network.fetch(request).await?),
  };

  println!(
    "{} {} {} ({} bytes, from {})",
    url,
    response.status,
    response.status_text,
    response.body.len(),
    source.map_or_else(|| "passthrough".to_string(), |s| s.to_string())
  );
  if let Some(cached_at) = cached_at {
    println!("cached at {}", cached_at.to_rfc3339());
  }
  if source == Some(CacheSource::Offline) {
    return Err(eyre!("{} is not available offline", url));
  }
  Ok(())
}

fn list_caches(storage: &impl CacheStorage, current: &str) -> Result<()> {
  let names = storage.keys()?;
  if names.is_empty() {
    println!("No caches");
    return Ok(());
  }

  for name in names {
    let marker = if name == current { "*" } else { " " };
    println!("{} {} ({} entries)", marker, name, storage.entry_count(&name)?);
  }
  Ok(())
}
