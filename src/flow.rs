//! Flow model shared with the intercepting engine

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, Version};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque identifier of one intercepted exchange.
///
/// Engines hand these out; they are never reused within a process.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowId(String);

impl FlowId {
  /// Wrap an engine-provided identifier
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  /// Generate a fresh random identifier
  pub fn generate() -> Self {
    Self(uuid::Uuid::new_v4().to_string())
  }

  /// Identifier as a string slice
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for FlowId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for FlowId {
  fn from(value: &str) -> Self {
    Self::new(value)
  }
}

/// Request half of a live flow
#[derive(Clone, Debug, Default)]
pub struct FlowRequest {
  uri: Uri,
  version: Version,
  method: Method,
  headers: HeaderMap<HeaderValue>,
  body: Bytes,
}

impl<T> From<http::Request<T>> for FlowRequest
where
  T: Into<Bytes>,
{
  fn from(value: http::Request<T>) -> Self {
    let (parts, body) = value.into_parts();
    Self {
      uri: parts.uri,
      version: parts.version,
      method: parts.method,
      headers: parts.headers,
      body: body.into(),
    }
  }
}

impl FlowRequest {
  /// Request method
  #[inline]
  pub fn method(&self) -> &Method {
    &self.method
  }
  /// Mutable request method
  #[inline]
  pub fn method_mut(&mut self) -> &mut Method {
    &mut self.method
  }
  /// Absolute request URI
  #[inline]
  pub fn uri(&self) -> &Uri {
    &self.uri
  }
  /// Mutable request URI
  #[inline]
  pub fn uri_mut(&mut self) -> &mut Uri {
    &mut self.uri
  }
  /// Protocol version
  #[inline]
  pub fn version(&self) -> Version {
    self.version
  }
  /// Mutable protocol version
  #[inline]
  pub fn version_mut(&mut self) -> &mut Version {
    &mut self.version
  }
  /// Request headers
  #[inline]
  pub fn headers(&self) -> &HeaderMap<HeaderValue> {
    &self.headers
  }
  /// Mutable request headers
  #[inline]
  pub fn headers_mut(&mut self) -> &mut HeaderMap<HeaderValue> {
    &mut self.headers
  }
  /// Request body
  #[inline]
  pub fn body(&self) -> &Bytes {
    &self.body
  }
  /// Mutable request body
  #[inline]
  pub fn body_mut(&mut self) -> &mut Bytes {
    &mut self.body
  }

  /// Target host, without port
  pub fn host(&self) -> &str {
    self
      .uri
      .host()
      .or_else(|| {
        self
          .headers
          .get(http::header::HOST)
          .and_then(|h| h.to_str().ok())
          .map(strip_port)
      })
      .unwrap_or_default()
  }

  /// Path plus query, `/` when the URI has none
  pub fn path(&self) -> &str {
    self
      .uri
      .path_and_query()
      .map(|pq| pq.as_str())
      .unwrap_or("/")
  }

  /// Fully-qualified URL as shown to the operator
  pub fn pretty_url(&self) -> String {
    if self.uri.scheme().is_some() {
      return self.uri.to_string();
    }
    let host = self
      .headers
      .get(http::header::HOST)
      .and_then(|h| h.to_str().ok())
      .unwrap_or_default();
    format!("http://{}{}", host, self.path())
  }

  /// Replace path and query, keeping scheme and authority.
  ///
  /// An absolute-form target (`http://…`) replaces the whole URI. Any
  /// other target must start with `/`.
  pub fn set_path(&mut self, path: &str) -> crate::Result<()> {
    if path.starts_with("http://") || path.starts_with("https://") {
      self.uri = path.parse::<Uri>()?;
      return Ok(());
    }
    if !path.starts_with('/') {
      return Err(crate::Error::parse_error(format!(
        "request target `{}` is neither absolute nor origin-form",
        path
      )));
    }
    let mut parts = self.uri.clone().into_parts();
    parts.path_and_query = Some(path.parse()?);
    self.uri = Uri::from_parts(parts)?;
    Ok(())
  }
}

// `host[:port]` from a Host header. Bracketed IPv6 keeps its brackets like
// `Uri::host`, and a bare IPv6 address is left alone.
fn strip_port(host: &str) -> &str {
  match host.rsplit_once(':') {
    Some((name, port))
      if !port.is_empty()
        && port.bytes().all(|b| b.is_ascii_digit())
        && (name.ends_with(']') || !name.contains(':')) =>
    {
      name
    }
    _ => host,
  }
}

/// Response half of a live flow
#[derive(Clone, Debug, Default)]
pub struct FlowResponse {
  version: Version,
  status_code: StatusCode,
  headers: HeaderMap<HeaderValue>,
  body: Bytes,
}

impl<T> From<http::Response<T>> for FlowResponse
where
  T: Into<Bytes>,
{
  fn from(value: http::Response<T>) -> Self {
    let (parts, body) = value.into_parts();
    Self {
      version: parts.version,
      status_code: parts.status,
      headers: parts.headers,
      body: body.into(),
    }
  }
}

impl FlowResponse {
  /// Status code
  #[inline]
  pub fn status_code(&self) -> StatusCode {
    self.status_code
  }
  /// Protocol version
  #[inline]
  pub fn version(&self) -> Version {
    self.version
  }
  /// Response headers
  #[inline]
  pub fn headers(&self) -> &HeaderMap<HeaderValue> {
    &self.headers
  }
  /// Response body
  #[inline]
  pub fn body(&self) -> &Bytes {
    &self.body
  }

  /// `content-type` lower-cased and cut at the first `;`
  pub fn media_type(&self) -> Option<String> {
    let value = self.headers.get(http::header::CONTENT_TYPE)?.to_str().ok()?;
    let media = value.split(';').next().unwrap_or_default();
    Some(media.trim().to_ascii_lowercase())
  }
}

/// The engine's mutable record of one exchange.
///
/// Engines own flows; the registry only keeps a shared handle and replay
/// always works on a deep clone.
#[derive(Clone, Debug)]
pub struct Flow {
  id: FlowId,
  /// Timestamp (ms since epoch) when the request was intercepted
  pub timestamp: u64,
  /// Request half
  pub request: FlowRequest,
  /// Response half, absent until the server answered
  pub response: Option<FlowResponse>,
}

impl Flow {
  /// Create a flow for a freshly intercepted request
  pub fn new(id: FlowId, request: impl Into<FlowRequest>) -> Self {
    Self {
      id,
      timestamp: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0),
      request: request.into(),
      response: None,
    }
  }

  /// Attach a response
  pub fn with_response(mut self, response: impl Into<FlowResponse>) -> Self {
    self.response = Some(response.into());
    self
  }

  /// Flow identifier
  pub fn id(&self) -> &FlowId {
    &self.id
  }
}

/// Immutable snapshot of a captured flow handed to the UI
#[derive(Clone, Debug, PartialEq)]
pub struct CapturedFlow {
  /// Identifier of the live flow this was projected from
  pub flow_id: FlowId,
  /// Request method
  pub method: Method,
  /// Fully-qualified URL
  pub url: String,
  /// Path plus query
  pub path: String,
  /// Request protocol version
  pub version: Version,
  /// Response status, `None` when no response arrived
  pub status: Option<StatusCode>,
  /// Request headers, one entry per name, last value wins
  pub request_headers: Vec<(String, String)>,
  /// Request body
  pub request_body: Bytes,
  /// Response headers, one entry per name, last value wins
  pub response_headers: Vec<(String, String)>,
  /// Response body
  pub response_body: Bytes,
}

impl CapturedFlow {
  /// Status as shown in the history table
  pub fn status_text(&self) -> String {
    match self.status {
      Some(status) => status.as_u16().to_string(),
      None => "No Response".to_string(),
    }
  }
}

impl From<&Flow> for CapturedFlow {
  fn from(flow: &Flow) -> Self {
    let request = &flow.request;
    let (status, response_headers, response_body) = match &flow.response {
      Some(response) => (
        Some(response.status_code()),
        header_pairs(response.headers()),
        response.body().clone(),
      ),
      None => (None, Vec::new(), Bytes::new()),
    };
    CapturedFlow {
      flow_id: flow.id().clone(),
      method: request.method().clone(),
      url: request.pretty_url(),
      path: request.path().to_string(),
      version: request.version(),
      status,
      request_headers: header_pairs(request.headers()),
      request_body: request.body().clone(),
      response_headers,
      response_body,
    }
  }
}

/// Protocol version in its wire spelling
pub fn version_str(version: Version) -> &'static str {
  match version {
    Version::HTTP_09 => "HTTP/0.9",
    Version::HTTP_10 => "HTTP/1.0",
    Version::HTTP_2 => "HTTP/2.0",
    Version::HTTP_3 => "HTTP/3.0",
    _ => "HTTP/1.1",
  }
}

fn header_pairs(headers: &HeaderMap<HeaderValue>) -> Vec<(String, String)> {
  headers
    .keys()
    .map(|name| {
      let value = headers
        .get_all(name)
        .iter()
        .last()
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .unwrap_or_default();
      (name.as_str().to_string(), value)
    })
    .collect()
}
