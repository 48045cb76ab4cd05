//! Cache layer that orchestrates caching logic with network fetching.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::storage::CacheStorage;
use super::traits::{CacheResult, CachedResponse};
use crate::http::{Request, Response};

/// Cache layer that manages caching logic and network fetching.
///
/// This layer sits between the worker and the network, providing
/// network-first fetching with offline fallback.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
}

impl<S: CacheStorage> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
    }
  }

  /// Direct access to the bucket storage.
  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Fetch every request and store all responses in `bucket`, or none.
  ///
  /// Fails if any fetch rejects or answers with a non-ok status.
  pub async fn add_all<F, Fut>(&self, bucket: &str, requests: Vec<Request>, fetcher: F) -> Result<()>
  where
    F: Fn(Request) -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    let fetches = requests.into_iter().map(|request| {
      let fetch = fetcher(request.clone());
      async move {
        let response = fetch
          .await
          .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;
        if !response.ok() {
          return Err(eyre!(
            "Fetching {} returned status {}",
            request.url,
            response.status
          ));
        }
        Ok::<_, color_eyre::Report>((request, response))
      }
    });

    let entries = try_join_all(fetches).await?;
    self.storage.put_all(bucket, &entries)?;
    debug!(bucket, count = entries.len(), "populated cache");

    Ok(())
  }

  /// Fetch with a network-first strategy.
  ///
  /// 1. Start the network fetch and a cache lookup concurrently
  /// 2. On a response, store it in `bucket` if ok and return it
  /// 3. On rejection, return the cached response (offline mode)
  /// 4. With nothing cached, return a synthesized 503
  pub async fn network_first<F, Fut>(
    &self,
    bucket: &str,
    request: &Request,
    fetcher: F,
  ) -> CacheResult<Response>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    // The lookup is only consulted when the network rejects
    let lookup = async { self.lookup(request) };
    let (network, cached) = futures::join!(fetcher(), lookup);

    match network {
      Ok(response) => {
        if response.ok() && request.cache_identity().is_some() {
          self.store(bucket, request, &response);
        }
        CacheResult::from_network(response)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "network fetch rejected");
        match cached {
          Some(cached) => CacheResult::from_cache(cached.response, cached.cached_at),
          None => CacheResult::offline(Response::offline()),
        }
      }
    }
  }

  fn lookup(&self, request: &Request) -> Option<CachedResponse> {
    match self.storage.match_request(request) {
      Ok(cached) => cached,
      Err(e) => {
        warn!(url = %request.url, error = %e, "cache lookup failed");
        None
      }
    }
  }

  /// Store a copy of the response; failures are logged and otherwise ignored.
  fn store(&self, bucket: &str, request: &Request, response: &Response) {
    if let Err(e) = self.storage.put(bucket, request, response) {
      warn!(url = %request.url, error = %e, "failed to cache response");
    }
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
    }
  }
}
