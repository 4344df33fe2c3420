//! Capture decisions for intercepted traffic

use crate::config::Config;
use crate::flow::Flow;
use crate::scope::ScopeFilter;
use std::fmt;
use std::sync::Arc;

/// Outcome of the request-phase check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestVerdict {
  /// Let the exchange proceed
  Allow,
  /// Kill the exchange at engine level
  Block,
}

/// Outcome of the response-phase cascade
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponseVerdict {
  /// Forward the flow to the UI
  Capture,
  /// Keep the flow out of the history
  Drop(DropReason),
}

/// Why a response was kept out of the history
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DropReason {
  /// URL outside the operator's scope
  OutOfScope,
  /// Static asset extension
  Extension(String),
  /// Blocked content type
  ContentType(String),
  /// Dropped by a custom rule
  Rule(&'static str),
}

impl fmt::Display for DropReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DropReason::OutOfScope => f.write_str("out of scope"),
      DropReason::Extension(ext) => write!(f, "static extension .{}", ext),
      DropReason::ContentType(ct) => write!(f, "content type {}", ct),
      DropReason::Rule(name) => write!(f, "rule {}", name),
    }
  }
}

/// One response-phase predicate.
///
/// Returning `Some` drops the flow and stops the cascade.
pub trait ResponseRule: Send + Sync {
  /// Inspect a finished flow under the current scope
  fn check(&self, flow: &Flow, scope: &ScopeFilter) -> Option<DropReason>;
}

/// Drops flows whose URL is outside an active scope
pub struct ScopeRule;

impl ResponseRule for ScopeRule {
  fn check(&self, flow: &Flow, scope: &ScopeFilter) -> Option<DropReason> {
    if scope.is_active() && !scope.matches(&flow.request.pretty_url()) {
      return Some(DropReason::OutOfScope);
    }
    None
  }
}

/// Drops static assets by path extension
pub struct ExtensionRule {
  blocked: Vec<String>,
}

impl ExtensionRule {
  /// Rule over lower-case extensions without the dot
  pub fn new<I, S>(blocked: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      blocked: blocked
        .into_iter()
        .map(|e| {
          let e: String = e.into();
          e.trim_start_matches('.').to_ascii_lowercase()
        })
        .collect(),
    }
  }
}

impl ResponseRule for ExtensionRule {
  fn check(&self, flow: &Flow, _scope: &ScopeFilter) -> Option<DropReason> {
    let ext = path_extension(flow.request.uri().path())?;
    if self.blocked.iter().any(|b| *b == ext) {
      return Some(DropReason::Extension(ext));
    }
    None
  }
}

/// Drops responses by `content-type` prefix
pub struct ContentTypeRule {
  blocked: Vec<String>,
}

impl ContentTypeRule {
  /// Rule over lower-case content-type prefixes
  pub fn new<I, S>(blocked: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      blocked: blocked
        .into_iter()
        .map(|c| {
          let c: String = c.into();
          c.to_ascii_lowercase()
        })
        .collect(),
    }
  }
}

impl ResponseRule for ContentTypeRule {
  fn check(&self, flow: &Flow, _scope: &ScopeFilter) -> Option<DropReason> {
    let media = flow.response.as_ref()?.media_type()?;
    if self.blocked.iter().any(|b| media.starts_with(b.as_str())) {
      return Some(DropReason::ContentType(media));
    }
    None
  }
}

/// Lower-cased extension of the last path segment
pub fn path_extension(path: &str) -> Option<String> {
  let segment = path.rsplit('/').next().unwrap_or(path);
  let (_, ext) = segment.rsplit_once('.')?;
  if ext.is_empty() {
    return None;
  }
  Some(ext.to_ascii_lowercase())
}

/// Request blocklist plus the ordered response cascade
pub struct CaptureFilterChain {
  blocked_domains: Vec<String>,
  response_rules: Vec<Arc<dyn ResponseRule>>,
}

impl CaptureFilterChain {
  /// Chain with no blocklist and no response rules
  pub fn new() -> Self {
    Self {
      blocked_domains: Vec::new(),
      response_rules: Vec::new(),
    }
  }

  /// Standard chain: scope, then extension, then content type
  pub fn from_config(config: &Config) -> Self {
    let mut chain = Self::new();
    chain.blocked_domains = config
      .blocked_domains
      .iter()
      .map(|d| d.to_ascii_lowercase())
      .collect();
    chain.add_response_rule(Arc::new(ScopeRule));
    chain.add_response_rule(Arc::new(ExtensionRule::new(
      config.blocked_extensions.iter().cloned(),
    )));
    chain.add_response_rule(Arc::new(ContentTypeRule::new(
      config.blocked_content_types.iter().cloned(),
    )));
    chain
  }

  /// Add a blocked domain substring
  pub fn add_blocked_domain(&mut self, domain: impl Into<String>) {
    self.blocked_domains.push(domain.into().to_ascii_lowercase());
  }

  /// Append a response rule to the end of the cascade
  pub fn add_response_rule(&mut self, rule: Arc<dyn ResponseRule>) {
    self.response_rules.push(rule);
  }

  /// Request phase: block hosts containing a blocklisted substring
  pub fn on_request_phase(&self, host: &str) -> RequestVerdict {
    let host = host.to_ascii_lowercase();
    match self.blocked_domains.iter().find(|d| host.contains(d.as_str())) {
      Some(domain) => {
        tracing::debug!("[CAPTURE] Blocking {} (matches {})", host, domain);
        RequestVerdict::Block
      }
      None => RequestVerdict::Allow,
    }
  }

  /// Response phase: first rule that objects wins, otherwise capture
  pub fn on_response_phase(&self, flow: &Flow, scope: &ScopeFilter) -> ResponseVerdict {
    for rule in &self.response_rules {
      if let Some(reason) = rule.check(flow, scope) {
        tracing::trace!(
          "[CAPTURE] Dropping {} {}: {}",
          flow.request.method(),
          flow.request.uri(),
          reason
        );
        return ResponseVerdict::Drop(reason);
      }
    }
    ResponseVerdict::Capture
  }
}

impl Default for CaptureFilterChain {
  fn default() -> Self {
    Self::from_config(&Config::default())
  }
}
