//! Operator-defined capture scope

use crate::errors::{Error, Result};
use regex::{Regex, RegexBuilder};

// Upper bound for the compiled matcher; longer patterns are rejected.
const SCOPE_SIZE_LIMIT: usize = 1 << 20;

/// Wildcard URL filter.
///
/// `*` stands for any run of characters (possibly empty), every other
/// character matches itself, and the pattern has to cover the whole URL.
/// A disabled filter matches everything.
#[derive(Clone, Debug, Default)]
pub struct ScopeFilter {
  pattern: String,
  matcher: Option<Regex>,
}

impl ScopeFilter {
  /// Filter that lets every URL through
  pub fn disabled() -> Self {
    Self::default()
  }

  /// Compile `pattern`, reporting why it is unusable.
  ///
  /// A blank pattern yields a disabled filter.
  pub fn compile(pattern: &str) -> Result<Self> {
    compile_with_limit(pattern, SCOPE_SIZE_LIMIT)
  }

  /// Compile `pattern`, falling back to a disabled filter when it is invalid.
  pub fn new(pattern: &str) -> Self {
    match Self::compile(pattern) {
      Ok(filter) => filter,
      Err(e) => {
        tracing::warn!("[CAPTURE] {}; scope disabled", e);
        Self::disabled()
      }
    }
  }

  /// Whether a pattern is in effect
  pub fn is_active(&self) -> bool {
    self.matcher.is_some()
  }

  /// Pattern as typed, empty when disabled
  pub fn pattern(&self) -> &str {
    &self.pattern
  }

  /// Does `url` fall inside the scope
  pub fn matches(&self, url: &str) -> bool {
    match &self.matcher {
      Some(matcher) => matcher.is_match(url),
      None => true,
    }
  }
}

fn compile_with_limit(pattern: &str, size_limit: usize) -> Result<ScopeFilter> {
  let trimmed = pattern.trim();
  if trimmed.is_empty() {
    return Ok(ScopeFilter::disabled());
  }
  let body = trimmed
    .split('*')
    .map(regex::escape)
    .collect::<Vec<_>>()
    .join(".*");
  let matcher = RegexBuilder::new(&format!("^{}$", body))
    .dot_matches_new_line(true)
    .size_limit(size_limit)
    .build()
    .map_err(|e| Error::FilterConfig {
      pattern: pattern.to_string(),
      reason: e.to_string(),
    })?;
  Ok(ScopeFilter {
    pattern: trimmed.to_string(),
    matcher: Some(matcher),
  })
}
