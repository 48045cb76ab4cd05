//! Request and response values exchanged between the host, the network and
//! the cache.

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use tracing::debug;
use url::Url;

/// An intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
}

impl Request {
  /// Build a plain GET request.
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      headers: Vec::new(),
      body: Bytes::new(),
    }
  }

  /// Build a GET request for `path` on `origin`.
  pub fn get_path(origin: &Url, path: &str) -> Result<Self> {
    Ok(Self::get(rebase(origin, path)?))
  }

  /// URL path component, used for prefix routing.
  pub fn path(&self) -> &str {
    self.url.path()
  }

  pub fn is_get(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }

  /// Cache identity: the URL without its fragment.
  ///
  /// Only GET requests have one.
  pub fn cache_identity(&self) -> Option<String> {
    if !self.is_get() {
      return None;
    }
    let mut url = self.url.clone();
    url.set_fragment(None);
    Some(url.to_string())
  }
}

/// A response, either from the network, the cache, or synthesized.
///
/// Cloning is cheap: the body is reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
    Self {
      status,
      status_text: canonical_reason(status).to_string(),
      headers: Vec::new(),
      body: body.into(),
    }
  }

  /// The fallback returned when neither the network nor the cache can answer.
  pub fn offline() -> Self {
    Self::new(503, "Offline").with_header("content-type", "text/plain;charset=UTF-8")
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// Whether the status is in the 2xx range.
  pub fn ok(&self) -> bool {
    (200..=299).contains(&self.status)
  }

  #[cfg(test)]
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

fn canonical_reason(status: u16) -> &'static str {
  match status {
    200 => "OK",
    204 => "No Content",
    206 => "Partial Content",
    304 => "Not Modified",
    404 => "Not Found",
    500 => "Internal Server Error",
    502 => "Bad Gateway",
    503 => "Service Unavailable",
    _ => "",
  }
}

/// Put an absolute path, with optional query and fragment, onto `origin`.
///
/// The path is never resolved as a reference of its own: `//host/x` stays
/// on `origin` with the path `//host/x`.
pub fn rebase(origin: &Url, path: &str) -> Result<Url> {
  if !path.starts_with('/') {
    return Err(eyre!("Invalid request path '{}': must start with '/'", path));
  }

  let (rest, fragment) = match path.split_once('#') {
    Some((rest, fragment)) => (rest, Some(fragment)),
    None => (path, None),
  };
  let (path, query) = match rest.split_once('?') {
    Some((path, query)) => (path, Some(query)),
    None => (rest, None),
  };

  let mut url = origin.clone();
  url.set_path(path);
  url.set_query(query);
  url.set_fragment(fragment);
  Ok(url)
}

/// Headers that are not carried over when a request or response is
/// forwarded.
///
/// Besides the hop-by-hop headers this covers `host` and `content-length`:
/// the HTTP client sets both again for the rebased URL and the body it
/// actually sends.
pub fn is_connection_specific(name: &str) -> bool {
  const CONNECTION_SPECIFIC: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
  ];
  CONNECTION_SPECIFIC.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Copy raw header pairs into the text form kept on requests and responses.
///
/// Connection-specific headers are skipped. Values that are not visible
/// ASCII cannot be sent on as text and are dropped with a debug log.
pub fn forwardable_headers<'a>(
  headers: impl IntoIterator<Item = (&'a str, &'a [u8])>,
) -> Vec<(String, String)> {
  headers
    .into_iter()
    .filter(|(name, _)| !is_connection_specific(name))
    .filter_map(|(name, value)| match std::str::from_utf8(value) {
      Ok(text) if text.bytes().all(|b| b == b'\t' || (0x20..0x7f).contains(&b)) => {
        Some((name.to_string(), text.to_string()))
      }
      _ => {
        debug!(header = name, len = value.len(), "dropping header with non-text value");
        None
      }
    })
    .collect()
}
