//! Workbench configuration

use std::time::Duration;

/// Environment variable holding the AI provider credential
pub const AI_API_KEY_ENV: &str = "AUTOSITEMAP_AI_API_KEY";
/// Environment variable overriding the AI model name
pub const AI_MODEL_ENV: &str = "AUTOSITEMAP_AI_MODEL";

/// Default model name handed to the text generator
pub const DEFAULT_AI_MODEL: &str = "gemini-2.5-flash";

/// Analytics and telemetry hosts killed at request time.
pub const DEFAULT_BLOCKED_DOMAINS: &[&str] = &[
  "google-analytics.com",
  "googletagmanager.com",
  "doubleclick.net",
  "googlesyndication.com",
  "googleadservices.com",
  "optimizationguide-pa.googleapis.com",
  "safebrowsing.googleapis.com",
  "update.googleapis.com",
  "clientservices.googleapis.com",
  "mozilla.cloudflare-dns.com",
  "connect.facebook.net",
  "hotjar.com",
  "sentry.io",
];

/// Static asset extensions dropped at response time.
pub const DEFAULT_BLOCKED_EXTENSIONS: &[&str] = &[
  "js", "mjs", "css", "map", "png", "jpg", "jpeg", "gif", "bmp", "ico", "svg", "webp", "avif",
  "woff", "woff2", "ttf", "otf", "eot", "mp3", "wav", "ogg", "m4a", "mp4", "webm", "avi", "mov",
];

/// Content-type prefixes dropped at response time.
pub const DEFAULT_BLOCKED_CONTENT_TYPES: &[&str] = &[
  "image/",
  "text/css",
  "application/javascript",
  "text/javascript",
  "application/x-javascript",
  "font/",
  "application/font-",
  "audio/",
  "video/",
];

/// Configuration for the capture pipeline and orchestrators
#[derive(Clone, Debug)]
pub struct Config {
  /// Host the intercepting engine listens on
  pub listen_host: String,
  /// Port the intercepting engine listens on
  pub listen_port: u16,
  /// Sleep between two empty command polls
  pub poll_interval: Duration,
  /// Substrings of request hosts that are killed before they complete
  pub blocked_domains: Vec<String>,
  /// Lower-case path extensions that are never captured
  pub blocked_extensions: Vec<String>,
  /// Lower-case content-type prefixes that are never captured
  pub blocked_content_types: Vec<String>,
  /// AI patching settings
  pub ai: AiConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      listen_host: "127.0.0.1".to_string(),
      listen_port: 8080,
      poll_interval: Duration::from_millis(100),
      blocked_domains: to_owned(DEFAULT_BLOCKED_DOMAINS),
      blocked_extensions: to_owned(DEFAULT_BLOCKED_EXTENSIONS),
      blocked_content_types: to_owned(DEFAULT_BLOCKED_CONTENT_TYPES),
      ai: AiConfig::default(),
    }
  }
}

impl Config {
  /// `host:port` the engine listens on
  pub fn listen_addr(&self) -> String {
    format!("{}:{}", self.listen_host, self.listen_port)
  }

  /// Proxy server URL handed to the browser session
  pub fn proxy_url(&self) -> String {
    format!("http://{}", self.listen_addr())
  }
}

/// Settings for the AI page-patching path
#[derive(Clone, Debug)]
pub struct AiConfig {
  /// Provider credential; `None` short-circuits every prompt with an error message
  pub api_key: Option<String>,
  /// Model name handed to the text generator
  pub model: String,
}

impl Default for AiConfig {
  fn default() -> Self {
    Self {
      api_key: None,
      model: DEFAULT_AI_MODEL.to_string(),
    }
  }
}

impl AiConfig {
  /// Read the credential and model from the process environment.
  ///
  /// An empty or whitespace-only key counts as missing.
  pub fn from_env() -> Self {
    let api_key = std::env::var(AI_API_KEY_ENV)
      .ok()
      .filter(|key| !key.trim().is_empty());
    let model = std::env::var(AI_MODEL_ENV)
      .ok()
      .filter(|model| !model.trim().is_empty())
      .unwrap_or_else(|| DEFAULT_AI_MODEL.to_string());
    Self { api_key, model }
  }

  /// Whether a usable credential is present
  pub fn has_credential(&self) -> bool {
    self
      .api_key
      .as_deref()
      .map(|key| !key.trim().is_empty())
      .unwrap_or(false)
  }
}

fn to_owned(values: &[&str]) -> Vec<String> {
  values.iter().map(|v| v.to_string()).collect()
}
