//! In-memory stand-ins for the engine, the browser session and the text provider
#![allow(dead_code)]

use autositemap::ai::TextGenerator;
use autositemap::browser::{BrowserSession, ExposedFunction};
use autositemap::capture::RequestVerdict;
use autositemap::{AiConfig, Config, Error, Flow, FlowHooks, FlowId, InterceptEngine, Result};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Config with a short poll interval
pub fn test_config() -> Config {
  Config {
    poll_interval: Duration::from_millis(5),
    ..Default::default()
  }
}

/// Poll `check` until it holds, panicking after about two seconds
pub async fn eventually<F: FnMut() -> bool>(what: &str, mut check: F) {
  for _ in 0..400 {
    if check() {
      return;
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
  panic!("timed out waiting for {}", what);
}

/// A finished GET exchange
pub fn exchange(id: &str, url: &str, content_type: &str, body: &'static str) -> Flow {
  let request = http::Request::builder()
    .method("GET")
    .uri(url)
    .header("user-agent", "test")
    .body("")
    .unwrap();
  let response = http::Response::builder()
    .status(200)
    .header("content-type", content_type)
    .body(body)
    .unwrap();
  Flow::new(FlowId::new(id), request).with_response(response)
}

/// Engine that serves nothing until a test pushes exchanges through it
#[derive(Default)]
pub struct MockEngine {
  hooks: Mutex<Option<Arc<dyn FlowHooks>>>,
  started: Notify,
  stop: Notify,
  replayed: Mutex<Vec<Flow>>,
  fail_with: Mutex<Option<String>>,
}

impl MockEngine {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  /// `run` returns this transport error once stopped
  pub fn failing(message: &str) -> Arc<Self> {
    let engine = Self::default();
    *engine.fail_with.lock().unwrap() = Some(message.to_string());
    Arc::new(engine)
  }

  pub async fn wait_started(&self) {
    self.started.notified().await;
  }

  /// Drive one exchange through the hooks like a real engine would
  pub async fn exchange(&self, flow: Flow) -> RequestVerdict {
    let hooks = self
      .hooks
      .lock()
      .unwrap()
      .clone()
      .expect("engine not running");
    let verdict = hooks.on_request(&flow).await;
    if verdict == RequestVerdict::Allow {
      hooks.on_response(Arc::new(flow)).await;
    }
    verdict
  }

  pub fn replayed(&self) -> Vec<Flow> {
    self.replayed.lock().unwrap().clone()
  }
}

#[async_trait::async_trait]
impl InterceptEngine for MockEngine {
  async fn run(&self, hooks: Arc<dyn FlowHooks>) -> Result<()> {
    {
      *self.hooks.lock().unwrap() = Some(hooks);
    }
    self.started.notify_one();
    self.stop.notified().await;
    let failure = self.fail_with.lock().unwrap().clone();
    match failure {
      Some(message) => Err(Error::Transport(message)),
      None => Ok(()),
    }
  }

  async fn replay_client(&self, flow: Flow) -> Result<()> {
    self.replayed.lock().unwrap().push(flow);
    Ok(())
  }

  fn shutdown(&self) {
    self.stop.notify_one();
  }
}

/// What a [`MockSession`] was asked to do
#[derive(Clone, Debug, PartialEq)]
pub enum SessionCall {
  Expose(String),
  InitScript,
  Goto(String),
  SetContent(String),
  Evaluate { script: String, arg: Value },
  Close,
}

/// Browser page recording every call
#[derive(Default)]
pub struct MockSession {
  calls: Mutex<Vec<SessionCall>>,
  exposed: Mutex<Option<Arc<dyn ExposedFunction>>>,
  disconnect: Notify,
  fail_evaluate: Mutex<bool>,
}

impl MockSession {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn calls(&self) -> Vec<SessionCall> {
    self.calls.lock().unwrap().clone()
  }

  /// Arguments of every `evaluate` of `script`, in order
  pub fn evaluations_of(&self, script: &str) -> Vec<Value> {
    self
      .calls()
      .into_iter()
      .filter_map(|call| match call {
        SessionCall::Evaluate { script: s, arg } if s == script => Some(arg),
        _ => None,
      })
      .collect()
  }

  /// The function the page would call as `window.handleAiPrompt`
  pub fn exposed(&self) -> Option<Arc<dyn ExposedFunction>> {
    self.exposed.lock().unwrap().clone()
  }

  /// Simulate the user closing the browser
  pub fn disconnect(&self) {
    self.disconnect.notify_one();
  }

  pub fn fail_evaluate(&self) {
    *self.fail_evaluate.lock().unwrap() = true;
  }

  fn record(&self, call: SessionCall) {
    self.calls.lock().unwrap().push(call);
  }
}

#[async_trait::async_trait]
impl BrowserSession for MockSession {
  async fn expose_function(&self, name: &str, function: Arc<dyn ExposedFunction>) -> Result<()> {
    *self.exposed.lock().unwrap() = Some(function);
    self.record(SessionCall::Expose(name.to_string()));
    Ok(())
  }

  async fn add_init_script(&self, _script: &str) -> Result<()> {
    self.record(SessionCall::InitScript);
    Ok(())
  }

  async fn goto(&self, url: &str) -> Result<()> {
    self.record(SessionCall::Goto(url.to_string()));
    Ok(())
  }

  async fn set_content(&self, html: &str) -> Result<()> {
    self.record(SessionCall::SetContent(html.to_string()));
    Ok(())
  }

  async fn evaluate(&self, script: &str, arg: Value) -> Result<Value> {
    self.record(SessionCall::Evaluate {
      script: script.to_string(),
      arg,
    });
    if *self.fail_evaluate.lock().unwrap() {
      return Err(Error::Transport("page crashed".to_string()));
    }
    Ok(Value::Null)
  }

  async fn content(&self) -> Result<String> {
    Ok("<html><body>mock</body></html>".to_string())
  }

  async fn url(&self) -> Result<String> {
    Ok("https://mock.test/".to_string())
  }

  async fn wait_for_disconnect(&self) {
    self.disconnect.notified().await;
  }

  async fn close(&self) -> Result<()> {
    self.record(SessionCall::Close);
    Ok(())
  }
}

/// Provider answering every prompt with the same chunks
pub struct MockGenerator {
  chunks: Vec<String>,
  calls: AtomicUsize,
  prompts: Mutex<Vec<String>>,
}

impl MockGenerator {
  pub fn new<S: Into<String>>(chunks: Vec<S>) -> Arc<Self> {
    Arc::new(Self {
      chunks: chunks.into_iter().map(Into::into).collect(),
      calls: AtomicUsize::new(0),
      prompts: Mutex::new(Vec::new()),
    })
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn prompts(&self) -> Vec<String> {
    self.prompts.lock().unwrap().clone()
  }
}

#[async_trait::async_trait]
impl TextGenerator for MockGenerator {
  async fn stream(
    &self,
    _config: &AiConfig,
    prompt: String,
  ) -> Result<BoxStream<'static, Result<String>>> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.prompts.lock().unwrap().push(prompt);
    let chunks: Vec<Result<String>> = self.chunks.iter().cloned().map(Ok).collect();
    Ok(futures::stream::iter(chunks).boxed())
  }
}

/// AI settings with a credential
pub fn ai_config() -> AiConfig {
  AiConfig {
    api_key: Some("test-key".to_string()),
    ..Default::default()
  }
}
