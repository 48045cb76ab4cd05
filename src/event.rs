use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::cache::CacheStorage;
use crate::http::Request;
use crate::network::Network;
use crate::worker::{Clients, FetchOutcome, ShellCacheWorker};

/// Lifecycle signals delivered to the worker, each with its completion handle
#[derive(Debug)]
pub enum Event {
  Install { done: oneshot::Sender<Result<()>> },
  Activate { done: oneshot::Sender<Result<()>> },
  Fetch {
    request: Request,
    respond_with: oneshot::Sender<FetchOutcome>,
  },
}

/// Sends events to a running worker loop
#[derive(Clone)]
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<Event>,
}

impl WorkerHandle {
  /// Spawn the event loop for `worker`.
  ///
  /// Install and activate run to completion inside the loop, so no later
  /// event is looked at before they resolve. Each fetch runs as its own task.
  pub fn spawn<S, N, C>(worker: Arc<ShellCacheWorker<S, N, C>>) -> Self
  where
    S: CacheStorage + 'static,
    N: Network + 'static,
    C: Clients + 'static,
  {
    let (tx, mut rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      while let Some(event) = rx.recv().await {
        match event {
          Event::Install { done } => {
            let _ = done.send(worker.install().await);
          }
          Event::Activate { done } => {
            let _ = done.send(worker.activate().await);
          }
          Event::Fetch {
            request,
            respond_with,
          } => {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move {
              let outcome = worker.handle_fetch(request).await;
              if respond_with.send(outcome).is_err() {
                debug!("fetch caller went away");
              }
            });
          }
        }
      }
    });

    Self { tx }
  }

  pub async fn install(&self) -> Result<()> {
    let (done, rx) = oneshot::channel();
    self.send(Event::Install { done })?;
    rx.await.map_err(|_| eyre!("Worker stopped during install"))?
  }

  pub async fn activate(&self) -> Result<()> {
    let (done, rx) = oneshot::channel();
    self.send(Event::Activate { done })?;
    rx.await.map_err(|_| eyre!("Worker stopped during activate"))?
  }

  /// Install, then activate once install has resolved.
  pub async fn register(&self) -> Result<()> {
    self.install().await?;
    self.activate().await
  }

  pub async fn fetch(&self, request: Request) -> Result<FetchOutcome> {
    let (respond_with, rx) = oneshot::channel();
    self.send(Event::Fetch {
      request,
      respond_with,
    })?;
    rx.await.map_err(|_| eyre!("Worker dropped a fetch event"))
  }

  fn send(&self, event: Event) -> Result<()> {
    self
      .tx
      .send(event)
      .map_err(|_| eyre!("Worker event loop is not running"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, SqliteStorage};
  use crate::config::WorkerConfig;
  use crate::http::Response;
  use crate::testing::{origin, request, FakeNetwork};
  use crate::worker::{LocalClients, WorkerState};

  fn spawn_worker(
    network: Arc<FakeNetwork>,
  ) -> (
    Arc<ShellCacheWorker<SqliteStorage, FakeNetwork, LocalClients>>,
    WorkerHandle,
  ) {
    let worker = Arc::new(ShellCacheWorker::new(
      WorkerConfig::default(),
      origin(),
      SqliteStorage::open_in_memory().unwrap(),
      network,
      LocalClients::new(),
    ));
    let handle = WorkerHandle::spawn(Arc::clone(&worker));
    (worker, handle)
  }

  #[tokio::test]
  async fn test_register_through_events() {
    let (worker, handle) = spawn_worker(Arc::new(FakeNetwork::with_shell()));

    handle.register().await.unwrap();
    assert_eq!(worker.state(), WorkerState::Active);
  }

  #[tokio::test]
  async fn test_failed_install_reported_to_caller() {
    let network = Arc::new(FakeNetwork::with_shell());
    network.set_online(false);
    let (worker, handle) = spawn_worker(network);

    assert!(handle.register().await.is_err());
    assert_eq!(worker.state(), WorkerState::Redundant);
  }

  #[tokio::test]
  async fn test_concurrent_fetches() {
    let network = Arc::new(FakeNetwork::with_shell());
    for i in 0..8 {
      network.serve(&format!("/static/chunk-{}.js", i), Response::new(200, format!("chunk {}", i)));
    }
    let (worker, handle) = spawn_worker(network);
    handle.register().await.unwrap();

    let fetches = (0..8).map(|i| {
      let handle = handle.clone();
      async move { handle.fetch(request(&format!("/static/chunk-{}.js", i))).await }
    });
    let outcomes = futures::future::join_all(fetches).await;

    for outcome in outcomes {
      match outcome.unwrap() {
        FetchOutcome::Respond(result) => assert_eq!(result.source, CacheSource::Network),
        FetchOutcome::Passthrough => panic!("expected a response"),
      }
    }
    // shell assets plus every chunk
    assert_eq!(worker.storage().entry_count("ollama-dashboard-v0.9").unwrap(), 12);
  }

  #[tokio::test]
  async fn test_api_fetch_passes_through() {
    let (_worker, handle) = spawn_worker(Arc::new(FakeNetwork::with_shell()));
    handle.register().await.unwrap();

    let outcome = handle.fetch(request("/api/updates")).await.unwrap();
    assert!(matches!(outcome, FetchOutcome::Passthrough));
  }
}
