//! The offline shell cache worker.
//!
//! Reacts to install, activate and fetch signals. Install populates the
//! versioned bucket with the shell assets, activate purges every other
//! bucket and claims clients, and fetch serves network-first with the cache
//! as the offline fallback.

mod clients;
mod lifecycle;
mod policy;

pub use clients::{Clients, LocalClients};
pub use lifecycle::WorkerState;
pub use policy::{activate_plan, install_plan, route, Action, Route};

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheLayer, CacheResult, CacheStorage};
use crate::config::WorkerConfig;
use crate::http::{Request, Response};
use crate::network::Network;

/// What the worker did with an intercepted request.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
  /// Declined to intervene; the host sends the request to the network itself
  Passthrough,
  /// Answered by the worker
  Respond(CacheResult<Response>),
}

/// Adapter executing lifecycle plans against storage, network and clients.
pub struct ShellCacheWorker<S: CacheStorage, N: Network, C: Clients> {
  config: WorkerConfig,
  origin: Url,
  cache: CacheLayer<S>,
  network: Arc<N>,
  clients: C,
  state: Mutex<WorkerState>,
}

impl<S: CacheStorage, N: Network, C: Clients> ShellCacheWorker<S, N, C> {
  /// Create a worker for one shell version. Shell asset paths resolve
  /// against `origin`.
  pub fn new(config: WorkerConfig, origin: Url, storage: S, network: Arc<N>, clients: C) -> Self {
    Self {
      config,
      origin,
      cache: CacheLayer::new(storage),
      network,
      clients,
      state: Mutex::new(WorkerState::Installing),
    }
  }

  pub fn storage(&self) -> &S {
    self.cache.storage()
  }

  #[cfg(test)]
  pub fn clients(&self) -> &C {
    &self.clients
  }

  pub fn state(&self) -> WorkerState {
    // The state is a plain Copy value, still valid after a panic elsewhere
    *self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn transition(&self, next: WorkerState) -> Result<()> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let next = state.advance(next)?;
    *state = next;
    info!(cache = %self.config.cache_name, state = %next, "worker state changed");
    Ok(())
  }

  /// Handle the install signal.
  ///
  /// Any failure leaves the bucket without a partial shell and makes this
  /// worker redundant.
  pub async fn install(&self) -> Result<()> {
    if self.state() != WorkerState::Installing {
      return Err(eyre!("Cannot install a worker that is {}", self.state()));
    }

    for action in install_plan(&self.config) {
      if let Err(e) = self.execute(action).await {
        warn!(cache = %self.config.cache_name, error = %e, "install failed");
        self.transition(WorkerState::Redundant)?;
        return Err(e);
      }
    }

    self.transition(WorkerState::Activating)
  }

  /// Handle the activate signal.
  pub async fn activate(&self) -> Result<()> {
    if self.state() != WorkerState::Activating {
      return Err(eyre!("Cannot activate a worker that is {}", self.state()));
    }

    let existing = self.storage().keys()?;
    for action in activate_plan(&self.config, &existing) {
      self.execute(action).await?;
    }

    self.transition(WorkerState::Active)
  }

  /// Install, then activate straight away.
  #[cfg(test)]
  pub async fn register(&self) -> Result<()> {
    self.install().await?;
    self.activate().await
  }

  /// Handle a fetch signal.
  ///
  /// Bypassed paths and requests arriving before activation are passed
  /// through without touching the cache.
  pub async fn handle_fetch(&self, request: Request) -> FetchOutcome {
    if route(&self.config, request.path()) == Route::Bypass {
      debug!(url = %request.url, "bypassing cache");
      return FetchOutcome::Passthrough;
    }
    if !self.state().is_active() {
      debug!(url = %request.url, state = %self.state(), "worker not in control");
      return FetchOutcome::Passthrough;
    }

    let result = self
      .cache
      .network_first(&self.config.cache_name, &request, || {
        self.network.fetch(request.clone())
      })
      .await;

    debug!(url = %request.url, source = %result.source, status = result.data.status, "fetch handled");
    FetchOutcome::Respond(result)
  }

  async fn execute(&self, action: Action) -> Result<()> {
    match action {
      Action::OpenCache { name } => self.storage().open(&name),
      Action::AddAll { cache, paths } => {
        let requests = paths
          .iter()
          .map(|path| Request::get_path(&self.origin, path))
          .collect::<Result<Vec<_>>>()?;
        self
          .cache
          .add_all(&cache, requests, |request| self.network.fetch(request))
          .await?;
        info!(cache = %cache, assets = paths.len(), "shell cached");
        Ok(())
      }
      Action::SkipWaiting => self.clients.skip_waiting().await,
      Action::DeleteCache { name } => {
        if self.storage().delete(&name)? {
          info!(cache = %name, "deleted outdated cache");
        }
        Ok(())
      }
      Action::ClaimClients => self.clients.claim().await,
    }
  }
}
