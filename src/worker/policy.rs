//! Lifecycle planning, free of any host access.
//!
//! Each lifecycle signal maps to a list of actions the worker adapter
//! executes in order against its host.

use crate::config::WorkerConfig;

/// A single step the host must perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
  /// Create the named bucket if absent
  OpenCache { name: String },
  /// Fetch every path and store all responses, or none
  AddAll { cache: String, paths: Vec<String> },
  /// Activate without waiting for older workers to release their clients
  SkipWaiting,
  /// Drop a bucket and everything in it
  DeleteCache { name: String },
  /// Take control of every open client
  ClaimClients,
}

/// How an intercepted request is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Not intercepted: goes to the network untouched and uncached
  Bypass,
  /// Network first, cache on rejection
  NetworkFirst,
}

/// Steps for the install signal.
pub fn install_plan(config: &WorkerConfig) -> Vec<Action> {
  vec![
    Action::OpenCache {
      name: config.cache_name.clone(),
    },
    Action::AddAll {
      cache: config.cache_name.clone(),
      paths: config.shell_assets.clone(),
    },
    Action::SkipWaiting,
  ]
}

/// Steps for the activate signal, given the bucket names that exist now.
pub fn activate_plan(config: &WorkerConfig, existing: &[String]) -> Vec<Action> {
  existing
    .iter()
    .filter(|name| **name != config.cache_name)
    .map(|name| Action::DeleteCache { name: name.clone() })
    .chain(std::iter::once(Action::ClaimClients))
    .collect()
}

/// Route a request by its URL path.
pub fn route(config: &WorkerConfig, path: &str) -> Route {
  if config
    .bypass_prefixes
    .iter()
    .any(|prefix| path.starts_with(prefix.as_str()))
  {
    Route::Bypass
  } else {
    Route::NetworkFirst
  }
}
