//! Network access for the worker.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::str::FromStr;

use crate::http::{forwardable_headers, is_connection_specific, Request, Response};

/// Something that can perform a request over the network.
///
/// A resolved fetch carries any HTTP status; an `Err` means the request
/// never got an answer (connection refused, DNS failure, ...).
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: Request) -> Result<Response>;
}

/// Network access over HTTP.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("shellcache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: Request) -> Result<Response> {
    let method = reqwest::Method::from_str(&request.method)
      .map_err(|e| eyre!("Invalid method '{}': {}", request.method, e))?;

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in &request.headers {
      if !is_connection_specific(name) {
        builder = builder.header(name.as_str(), value.as_str());
      }
    }
    if !request.body.is_empty() {
      builder = builder.body(request.body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = response.status();
    let headers = forwardable_headers(
      response
        .headers()
        .iter()
        .map(|(name, value)| (name.as_str(), value.as_bytes())),
    );

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or("").to_string(),
      headers,
      body,
    })
  }
}
