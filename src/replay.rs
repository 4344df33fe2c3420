//! Rebuild an HTTP request from operator-edited raw text

use crate::errors::{Error, Result};
use crate::flow::{version_str, Flow, FlowId};
use crate::registry::FlowRegistry;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Version};
use std::fmt;

/// Version used when the request line omits it
pub const DEFAULT_VERSION: Version = Version::HTTP_11;

/// Structured form of an edited raw request.
///
/// Headers keep input order and duplicates; the transport decides which
/// one wins.
#[derive(Clone, Debug, PartialEq)]
pub struct RawRequest {
  /// Request method
  pub method: Method,
  /// Request target as typed (origin-form or absolute-form)
  pub path: String,
  /// Protocol version
  pub version: Version,
  /// Header lines in input order
  pub headers: Vec<(HeaderName, HeaderValue)>,
  /// Body, verbatim
  pub body: Bytes,
}

impl RawRequest {
  /// Parse raw request text.
  ///
  /// Every `\r\n` becomes `\n` first, body included. The first blank line
  /// then separates head from body (missing ⇒ empty body), and the body is
  /// kept as is from there.
  pub fn parse(text: &str) -> Result<RawRequest> {
    let text = text.replace("\r\n", "\n");
    let (head, body) = text.split_once("\n\n").unwrap_or((text.as_str(), ""));
    let mut lines = head.lines();
    let request_line = lines
      .next()
      .filter(|line| !line.trim().is_empty())
      .ok_or_else(|| Error::parse_error("missing request line"))?;
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
      return Err(Error::parse_error(format!(
        "invalid request line `{}`",
        request_line
      )));
    }
    let method = Method::from_bytes(parts[0].as_bytes())
      .map_err(|_| Error::parse_error(format!("invalid method `{}`", parts[0])))?;
    let path = parts[1].to_string();
    let version = match parts.get(2) {
      Some(v) => parse_version(v)?,
      None => DEFAULT_VERSION,
    };

    let mut headers = Vec::new();
    for line in lines {
      if let Some(idx) = line.find(':') {
        let (name, value) = line.split_at(idx);
        let name = HeaderName::from_bytes(name.trim().as_bytes())
          .map_err(|_| Error::parse_error(format!("invalid header name `{}`", name.trim())))?;
        let value = HeaderValue::from_str(value[1..].trim())
          .map_err(|_| Error::parse_error(format!("invalid value for header `{}`", name)))?;
        headers.push((name, value));
      }
    }

    Ok(RawRequest {
      method,
      path,
      version,
      headers,
      body: Bytes::copy_from_slice(body.as_bytes()),
    })
  }

  /// Headers folded into a `HeaderMap`, duplicates appended
  pub fn header_map(&self) -> HeaderMap<HeaderValue> {
    let mut map = HeaderMap::with_capacity(self.headers.len());
    for (name, value) in &self.headers {
      map.append(name.clone(), value.clone());
    }
    map
  }

  /// Overwrite method, target, version, headers and body of `flow`.
  ///
  /// Nothing is written unless the new target is valid.
  pub fn apply_to(&self, flow: &mut Flow) -> Result<()> {
    let request = &mut flow.request;
    request.set_path(&self.path)?;
    *request.method_mut() = self.method.clone();
    *request.version_mut() = self.version;
    *request.headers_mut() = self.header_map();
    *request.body_mut() = self.body.clone();
    Ok(())
  }
}

impl std::str::FromStr for RawRequest {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    RawRequest::parse(s)
  }
}

impl fmt::Display for RawRequest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "{} {} {}", self.method, self.path, version_str(self.version))?;
    for (name, value) in &self.headers {
      writeln!(f, "{}: {}", name, String::from_utf8_lossy(value.as_bytes()))?;
    }
    writeln!(f)?;
    f.write_str(&String::from_utf8_lossy(&self.body))
  }
}

/// Reconstruct structured request parts from raw text
pub fn reconstruct(text: &str) -> Result<RawRequest> {
  RawRequest::parse(text)
}

/// Build the flow to hand to the engine's client replay.
///
/// Looks up `id`, parses `text`, and applies it to a deep clone; the
/// registered flow is never touched.
pub fn prepare_replay(registry: &FlowRegistry, id: &FlowId, text: &str) -> Result<Flow> {
  if !registry.contains(id) {
    return Err(Error::RegistryMiss(id.clone()));
  }
  let raw = RawRequest::parse(text)?;
  let mut flow = registry.clone_for_replay(id)?;
  raw.apply_to(&mut flow)?;
  Ok(flow)
}

fn parse_version(v: &str) -> Result<Version> {
  match v.to_ascii_uppercase().as_str() {
    "HTTP/0.9" => Ok(Version::HTTP_09),
    "HTTP/1.0" => Ok(Version::HTTP_10),
    "HTTP/1.1" => Ok(Version::HTTP_11),
    "HTTP/2" | "HTTP/2.0" => Ok(Version::HTTP_2),
    "HTTP/3" | "HTTP/3.0" => Ok(Version::HTTP_3),
    _ => Err(Error::parse_error(format!("unsupported version `{}`", v))),
  }
}
