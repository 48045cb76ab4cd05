//! Local HTTP front: turns browser requests into fetch events.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Router;
use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};
use url::Url;

use crate::event::WorkerHandle;
use crate::http::{forwardable_headers, is_connection_specific, rebase, Request, Response};
use crate::network::Network;
use crate::worker::FetchOutcome;

/// Largest request body forwarded upstream.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone)]
struct AppState {
  worker: WorkerHandle,
  network: Arc<dyn Network>,
  origin: Url,
}

async fn intercept(State(state): State<AppState>, req: axum::extract::Request) -> axum::response::Response {
  let request = match into_request(&state.origin, req).await {
    Ok(request) => request,
    Err(e) => {
      warn!(error = %e, "rejecting request");
      return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
    }
  };

  let outcome = match state.worker.fetch(request.clone()).await {
    Ok(outcome) => outcome,
    Err(e) => {
      warn!(error = %e, "worker unavailable, passing through");
      FetchOutcome::Passthrough
    }
  };

  match outcome {
    FetchOutcome::Respond(result) => into_axum(result.data),
    FetchOutcome::Passthrough => match state.network.fetch(request).await {
      Ok(response) => into_axum(response),
      Err(e) => {
        warn!(error = %e, "upstream unavailable");
        (StatusCode::BAD_GATEWAY, "Upstream unavailable").into_response()
      }
    },
  }
}

/// Rebase an incoming request onto the upstream origin.
async fn into_request(origin: &Url, req: axum::extract::Request) -> Result<Request> {
  let (parts, body) = req.into_parts();

  let path = parts
    .uri
    .path_and_query()
    .map(|pq| pq.as_str())
    .unwrap_or("/");
  let url = rebase(origin, path)?;

  let headers = forwardable_headers(
    parts
      .headers
      .iter()
      .map(|(name, value)| (name.as_str(), value.as_bytes())),
  );

  let body = to_bytes(body, MAX_BODY_BYTES)
    .await
    .map_err(|e| eyre!("Failed to read request body: {}", e))?;

  Ok(Request {
    method: parts.method.as_str().to_string(),
    url,
    headers,
    body,
  })
}

fn into_axum(response: Response) -> axum::response::Response {
  let mut builder = axum::http::Response::builder().status(response.status);
  for (name, value) in &response.headers {
    if !is_connection_specific(name) {
      builder = builder.header(name.as_str(), value.as_str());
    }
  }

  match builder.body(Body::from(response.body)) {
    Ok(response) => response,
    Err(e) => {
      warn!(error = %e, "invalid response");
      (StatusCode::INTERNAL_SERVER_ERROR, "Invalid response").into_response()
    }
  }
}

fn router(worker: WorkerHandle, network: Arc<dyn Network>, origin: Url) -> Router {
  let state = AppState {
    worker,
    network,
    origin,
  };

  Router::new().fallback(intercept).with_state(state)
}

/// Serve the front on `listen` until the process is stopped.
pub async fn serve(listen: &str, worker: WorkerHandle, network: Arc<dyn Network>, origin: Url) -> Result<()> {
  let addr: SocketAddr = listen
    .parse()
    .map_err(|e| eyre!("Invalid listen address '{}': {}", listen, e))?;
  let listener = tokio::net::TcpListener::bind(addr)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", addr, e))?;

  info!(%addr, upstream = %origin, "serving dashboard shell");
  axum::serve(listener, router(worker, network, origin))
    .await
    .map_err(|e| eyre!("Server error: {}", e))?;

  Ok(())
}
