//! Scripted host pieces for tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use url::Url;

use crate::cache::{CacheStorage, CachedResponse, SqliteStorage};
use crate::http::{Request, Response};
use crate::network::Network;

pub const ORIGIN: &str = "http://localhost:5000";

pub fn origin() -> Url {
  Url::parse(ORIGIN).unwrap()
}

pub fn request(path: &str) -> Request {
  Request::get_path(&origin(), path).unwrap()
}

/// A network answering from a fixed table; unknown URLs get a 404.
pub struct FakeNetwork {
  responses: Mutex<HashMap<String, Response>>,
  online: AtomicBool,
  fetches: AtomicUsize,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self {
      responses: Mutex::new(HashMap::new()),
      online: AtomicBool::new(true),
      fetches: AtomicUsize::new(0),
    }
  }

  /// Network that answers 200 for every default shell asset.
  pub fn with_shell() -> Self {
    let network = Self::new();
    for path in crate::config::SHELL_ASSETS {
      network.serve(path, Response::new(200, format!("asset {}", path)));
    }
    network
  }

  pub fn serve(&self, path: &str, response: Response) {
    let url = origin().join(path).unwrap().to_string();
    self.responses.lock().unwrap().insert(url, response);
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  pub fn fetch_count(&self) -> usize {
    self.fetches.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Network for FakeNetwork {
  async fn fetch(&self, request: Request) -> Result<Response> {
    self.fetches.fetch_add(1, Ordering::SeqCst);
    if !self.online.load(Ordering::SeqCst) {
      return Err(eyre!("network unreachable"));
    }
    let responses = self.responses.lock().unwrap();
    Ok(
      responses
        .get(request.url.as_str())
        .cloned()
        .unwrap_or_else(|| Response::new(404, "Not Found")),
    )
  }
}

/// In-memory storage that counts every read and write.
pub struct CountingStorage {
  inner: SqliteStorage,
  reads: AtomicUsize,
  writes: AtomicUsize,
}

impl CountingStorage {
  pub fn new() -> Self {
    Self {
      inner: SqliteStorage::open_in_memory().unwrap(),
      reads: AtomicUsize::new(0),
      writes: AtomicUsize::new(0),
    }
  }

  pub fn reads(&self) -> usize {
    self.reads.load(Ordering::SeqCst)
  }

  pub fn writes(&self) -> usize {
    self.writes.load(Ordering::SeqCst)
  }

  fn read(&self) {
    self.reads.fetch_add(1, Ordering::SeqCst);
  }

  fn write(&self) {
    self.writes.fetch_add(1, Ordering::SeqCst);
  }
}

impl CacheStorage for CountingStorage {
  fn open(&self, bucket: &str) -> Result<()> {
    self.write();
    self.inner.open(bucket)
  }

  fn keys(&self) -> Result<Vec<String>> {
    self.read();
    self.inner.keys()
  }

  fn delete(&self, bucket: &str) -> Result<bool> {
    self.write();
    self.inner.delete(bucket)
  }

  fn match_request(&self, request: &Request) -> Result<Option<CachedResponse>> {
    self.read();
    self.inner.match_request(request)
  }

  fn match_in(&self, bucket: &str, request: &Request) -> Result<Option<CachedResponse>> {
    self.read();
    self.inner.match_in(bucket, request)
  }

  fn put(&self, bucket: &str, request: &Request, response: &Response) -> Result<()> {
    self.write();
    self.inner.put(bucket, request, response)
  }

  fn put_all(&self, bucket: &str, entries: &[(Request, Response)]) -> Result<()> {
    self.write();
    self.inner.put_all(bucket, entries)
  }

  fn entry_count(&self, bucket: &str) -> Result<usize> {
    self.read();
    self.inner.entry_count(bucket)
  }
}
