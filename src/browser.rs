//! Browser context: session automation plus command polling

use crate::ai::AiPatchProtocol;
use crate::command::{BrowserCommand, BrowserEndpoint, CommandReceiver, CommandSender, WeakCommandSender};
use crate::config::Config;
use crate::context::OrchestratorState;
use crate::errors::{Error, Result};
use crate::replay::RawRequest;
use http::Method;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Name of the page function the prompt overlay calls
pub const PROMPT_FUNCTION: &str = "handleAiPrompt";

/// Init script adding the prompt overlay to every page
pub const PROMPT_OVERLAY_SCRIPT: &str = include_str!("assets/prompt_overlay.js");

/// Chromium switches that keep the browser's own background traffic out of
/// the capture
pub const CHROMIUM_ARGS: &[&str] = &[
  "--disable-background-networking",
  "--disable-component-update",
  "--disable-sync",
  "--disable-default-apps",
  "--no-first-run",
  "--safebrowsing-disable-auto-update",
  "--metrics-recording-only",
  "--no-default-browser-check",
  "--disable-extensions",
  "--disable-gcm",
  "--disable-breakpad",
];

/// Issues a replayed request from the current page; resolves to the status
pub const FETCH_SCRIPT: &str = r#"async (req) => {
  const init = { method: req.method, headers: req.headers, credentials: 'include' };
  if (req.body !== null) init.body = req.body;
  const res = await fetch(req.url, init);
  return res.status;
}"#;

// Headers a page script may not set on `fetch`.
const FORBIDDEN_HEADERS: &[&str] = &[
  "accept-charset",
  "accept-encoding",
  "access-control-request-headers",
  "access-control-request-method",
  "connection",
  "content-length",
  "cookie",
  "cookie2",
  "date",
  "dnt",
  "expect",
  "host",
  "keep-alive",
  "origin",
  "referer",
  "te",
  "trailer",
  "transfer-encoding",
  "upgrade",
  "via",
];

/// How the browser is launched
#[derive(Clone, Debug)]
pub struct LaunchOptions {
  /// Proxy every page request goes through
  pub proxy_server: String,
  /// Accept the interception certificate
  pub ignore_https_errors: bool,
  /// Run without a window
  pub headless: bool,
  /// Extra command line switches
  pub args: Vec<String>,
  /// First page opened
  pub start_url: String,
}

impl LaunchOptions {
  /// Headful browser proxied through the engine of `config`
  pub fn from_config(config: &Config) -> Self {
    Self {
      proxy_server: config.proxy_url(),
      ignore_https_errors: true,
      headless: false,
      args: CHROMIUM_ARGS.iter().map(|a| a.to_string()).collect(),
      start_url: "about:blank".to_string(),
    }
  }
}

impl Default for LaunchOptions {
  fn default() -> Self {
    LaunchOptions::from_config(&Config::default())
  }
}

/// A host function callable from page script
#[async_trait::async_trait]
pub trait ExposedFunction: Send + Sync {
  /// Called with the JSON arguments the page passed
  async fn call(&self, args: Vec<Value>) -> Result<Value>;
}

/// One automated browser page.
///
/// `evaluate` follows the usual automation convention: `script` is a
/// function expression and `arg` its single argument.
#[async_trait::async_trait]
pub trait BrowserSession: Send + Sync {
  /// Make `function` callable as `window.<name>` in every page
  async fn expose_function(&self, name: &str, function: Arc<dyn ExposedFunction>) -> Result<()>;
  /// Run `script` in every page before its own scripts
  async fn add_init_script(&self, script: &str) -> Result<()>;
  /// Navigate
  async fn goto(&self, url: &str) -> Result<()>;
  /// Replace the document
  async fn set_content(&self, html: &str) -> Result<()>;
  /// Evaluate a function expression with one argument
  async fn evaluate(&self, script: &str, arg: Value) -> Result<Value>;
  /// Current document HTML
  async fn content(&self) -> Result<String>;
  /// Current page URL
  async fn url(&self) -> Result<String>;
  /// Resolves once the browser is gone
  async fn wait_for_disconnect(&self);
  /// Close the browser
  async fn close(&self) -> Result<()>;
}

/// Starts browser sessions
#[async_trait::async_trait]
pub trait BrowserLauncher: Send + Sync {
  /// Launch a browser and open one page
  async fn launch(&self, options: &LaunchOptions) -> Result<Arc<dyn BrowserSession>>;
}

/// Host side of the overlay's `handleAiPrompt(prompt, html, url)`
pub struct PromptBinding {
  commands: WeakCommandSender<BrowserCommand>,
}

impl PromptBinding {
  /// Binding enqueuing prompts on `commands`
  pub fn new(commands: WeakCommandSender<BrowserCommand>) -> Self {
    Self { commands }
  }
}

#[async_trait::async_trait]
impl ExposedFunction for PromptBinding {
  async fn call(&self, args: Vec<Value>) -> Result<Value> {
    let mut args = args.into_iter();
    let prompt = match args.next() {
      Some(Value::String(prompt)) if !prompt.trim().is_empty() => prompt,
      _ => return Err(Error::parse_error("handleAiPrompt expects a prompt string")),
    };
    let mut optional = || match args.next() {
      Some(Value::String(s)) => Some(s),
      _ => None,
    };
    let html = optional();
    let url = optional();
    self.commands.send(BrowserCommand::AiPrompt { prompt, html, url })?;
    Ok(Value::Null)
  }
}

/// `fetch` argument for an edited raw request.
///
/// Headers the page may not set are dropped, duplicates are joined with
/// `, `; GET and HEAD never carry a body.
pub fn fetch_request(raw: &RawRequest) -> Value {
  let mut headers = Map::new();
  for (name, value) in &raw.headers {
    let name = name.as_str();
    if FORBIDDEN_HEADERS.contains(&name) || name.starts_with("proxy-") || name.starts_with("sec-") {
      continue;
    }
    let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
    let joined = match headers.get(name).and_then(Value::as_str) {
      Some(prev) => format!("{}, {}", prev, value),
      None => value,
    };
    headers.insert(name.to_string(), Value::String(joined));
  }
  let body = if raw.method == Method::GET || raw.method == Method::HEAD || raw.body.is_empty() {
    Value::Null
  } else {
    Value::String(String::from_utf8_lossy(&raw.body).into_owned())
  };
  json!({
    "url": raw.path,
    "method": raw.method.as_str(),
    "headers": headers,
    "body": body,
  })
}

/// Owns the browser session and serves browser commands against it.
///
/// The context ends when the browser disconnects or, failing that, when
/// every producer of browser commands is gone (the session is then closed).
pub struct BrowserOrchestrator {
  options: LaunchOptions,
  session: Arc<dyn BrowserSession>,
  commands: CommandReceiver<BrowserCommand>,
  loopback: Option<CommandSender<BrowserCommand>>,
  ai: AiPatchProtocol,
  poll_interval: Duration,
  state: OrchestratorState,
}

impl BrowserOrchestrator {
  /// Orchestrator around an already launched session
  pub fn new(
    config: &Config,
    session: Arc<dyn BrowserSession>,
    endpoint: BrowserEndpoint,
    ai: AiPatchProtocol,
  ) -> Self {
    let BrowserEndpoint { commands, loopback } = endpoint;
    Self {
      options: LaunchOptions::from_config(config),
      session,
      commands,
      loopback: Some(loopback),
      ai,
      poll_interval: config.poll_interval,
      state: OrchestratorState::Idle,
    }
  }

  /// Launch a browser with the profile derived from `config`
  pub async fn launch(
    launcher: &dyn BrowserLauncher,
    config: &Config,
    endpoint: BrowserEndpoint,
    ai: AiPatchProtocol,
  ) -> Result<Self> {
    let options = LaunchOptions::from_config(config);
    tracing::info!("[BROWSER] Launching (proxy {})", options.proxy_server);
    let session = launcher.launch(&options).await?;
    Ok(Self::new(config, session, endpoint, ai))
  }

  /// Current lifecycle state
  pub fn state(&self) -> OrchestratorState {
    self.state
  }

  /// Launch profile in use
  pub fn options(&self) -> &LaunchOptions {
    &self.options
  }

  /// Install the overlay, open the start page and serve commands until
  /// the browser goes away
  pub async fn run(&mut self) -> Result<()> {
    if !self.state.can_start() {
      return Err(Error::lifecycle_error(format!(
        "browser orchestrator is {:?}, a new instance is required",
        self.state
      )));
    }
    self.state = OrchestratorState::Starting;
    let result = self.run_loops().await;
    self.state = OrchestratorState::Terminal;
    tracing::info!("[BROWSER] Orchestrator terminated");
    result
  }

  async fn run_loops(&mut self) -> Result<()> {
    let loopback = self
      .loopback
      .take()
      .ok_or_else(|| Error::lifecycle_error("prompt loopback already taken"))?;
    let binding = Arc::new(PromptBinding::new(loopback.downgrade()));
    drop(loopback);

    self.session.expose_function(PROMPT_FUNCTION, binding).await?;
    self.session.add_init_script(PROMPT_OVERLAY_SCRIPT).await?;
    self.session.goto(&self.options.start_url).await?;
    self.state = OrchestratorState::Running;
    tracing::info!("[BROWSER] Ready at {}", self.options.start_url);

    let session = self.session.clone();
    tokio::select! {
      _ = session.wait_for_disconnect() => {
        tracing::info!("[BROWSER] Browser disconnected");
      }
      _ = self.poll_commands() => {
        tracing::info!("[BROWSER] No more commands; closing browser");
        if let Err(e) = session.close().await {
          tracing::warn!("[BROWSER] Close failed: {}", e);
        }
      }
    }
    Ok(())
  }

  async fn poll_commands(&mut self) {
    loop {
      match self.commands.try_next() {
        Ok(Some(command)) => self.dispatch(command).await,
        Ok(None) => tokio::time::sleep(self.poll_interval).await,
        Err(e) => {
          tracing::debug!("[BROWSER] {}", e);
          return;
        }
      }
    }
  }

  async fn dispatch(&self, command: BrowserCommand) {
    match command {
      BrowserCommand::Replay(raw_request) => {
        if let Err(e) = self.replay(&raw_request).await {
          tracing::warn!("[BROWSER] In-page replay failed: {}", e);
        }
      }
      BrowserCommand::Render(html) => {
        if let Err(e) = self.session.set_content(&html).await {
          tracing::warn!("[BROWSER] Render failed: {}", e);
        }
      }
      BrowserCommand::AiPrompt { prompt, html, url } => {
        self.ai_prompt(&prompt, html, url).await;
      }
    }
  }

  async fn replay(&self, raw_request: &str) -> Result<()> {
    let raw = RawRequest::parse(raw_request)?;
    tracing::info!("[BROWSER] Replaying {} {} from the page", raw.method, raw.path);
    let status = self.session.evaluate(FETCH_SCRIPT, fetch_request(&raw)).await?;
    tracing::info!("[BROWSER] In-page replay answered {}", status);
    Ok(())
  }

  async fn ai_prompt(&self, prompt: &str, html: Option<String>, url: Option<String>) {
    let html = match html {
      Some(html) => Some(html),
      None => self
        .session
        .content()
        .await
        .map_err(|e| tracing::debug!("[BROWSER] No page content: {}", e))
        .ok(),
    };
    let url = match url {
      Some(url) => Some(url),
      None => self
        .session
        .url()
        .await
        .map_err(|e| tracing::debug!("[BROWSER] No page url: {}", e))
        .ok(),
    };
    self
      .ai
      .handle_prompt(self.session.as_ref(), prompt, html.as_deref(), url.as_deref())
      .await;
  }
}
