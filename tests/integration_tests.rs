//! Integration tests for the proxy and browser orchestrators

mod common;

use autositemap::ai::{AiPatchProtocol, SHOW_RESPONSE_SCRIPT};
use autositemap::browser::{FETCH_SCRIPT, PROMPT_FUNCTION};
use autositemap::capture::RequestVerdict;
use autositemap::command::{command_bus, BrowserEndpoint, ProxyEndpoint};
use autositemap::{
  BrowserCommand, BrowserOrchestrator, Error, FlowId, History, Method, OrchestratorState,
  ProxyCommand, ProxyOrchestrator, ProxyShutdown, Result,
};
use common::{
  ai_config, eventually, exchange, test_config, MockEngine, MockGenerator, MockSession,
  SessionCall,
};
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;

async fn start_proxy(
  engine: &Arc<MockEngine>,
  endpoint: ProxyEndpoint,
) -> (ProxyShutdown, JoinHandle<(ProxyOrchestrator, Result<()>)>) {
  let mut proxy = ProxyOrchestrator::new(test_config(), engine.clone(), endpoint);
  assert_eq!(proxy.state(), OrchestratorState::Idle);
  let shutdown = proxy.shutdown_handle();
  let handle = tokio::spawn(async move {
    let result = proxy.run().await;
    (proxy, result)
  });
  engine.wait_started().await;
  (shutdown, handle)
}

fn start_browser(
  session: &Arc<MockSession>,
  generator: &Arc<MockGenerator>,
  endpoint: BrowserEndpoint,
) -> JoinHandle<(BrowserOrchestrator, Result<()>)> {
  let ai = AiPatchProtocol::new(ai_config(), generator.clone());
  let mut browser = BrowserOrchestrator::new(&test_config(), session.clone(), endpoint, ai);
  tokio::spawn(async move {
    let result = browser.run().await;
    (browser, result)
  })
}

#[tokio::test]
async fn test_capture_reaches_history() {
  let (ui, proxy, _browser) = command_bus();
  let engine = MockEngine::new();
  let (shutdown, handle) = start_proxy(&engine, proxy).await;
  let mut history = History::new(ui);

  let page = exchange("page", "https://app.test/account", "text/html; charset=utf-8", "<h1>hi</h1>");
  assert_eq!(engine.exchange(page).await, RequestVerdict::Allow);
  let image = exchange("image", "https://app.test/avatar", "image/png", "");
  assert_eq!(engine.exchange(image).await, RequestVerdict::Allow);
  let script = exchange("script", "https://app.test/app.js", "text/plain", "");
  assert_eq!(engine.exchange(script).await, RequestVerdict::Allow);
  let tracker = exchange("tracker", "https://www.google-analytics.com/collect", "text/html", "");
  assert_eq!(engine.exchange(tracker).await, RequestVerdict::Block);

  eventually("capture", || {
    history.tick();
    !history.is_empty()
  })
  .await;
  shutdown.shutdown();
  let (proxy, result) = handle.await.unwrap();
  assert!(result.is_ok());
  history.tick();

  let rows = history.rows();
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].method, "GET");
  assert_eq!(rows[0].url, "https://app.test/account");
  assert_eq!(rows[0].status, "200");
  assert_eq!(proxy.registry().len(), 1);
  assert!(proxy.registry().contains(&FlowId::new("page")));
}

#[tokio::test]
async fn test_replay_mutates_a_clone_only() {
  let (ui, proxy, _browser) = command_bus();
  let engine = MockEngine::new();
  let (shutdown, handle) = start_proxy(&engine, proxy).await;
  let mut history = History::new(ui);

  engine
    .exchange(exchange("f1", "https://app.test/items?page=1", "text/html", "<ul></ul>"))
    .await;
  eventually("capture", || history.tick() > 0).await;
  history.select(Some(0));
  let original_text = history.request_text().unwrap();
  assert!(original_text.starts_with("GET /items?page=1 HTTP/1.1\n"));

  history
    .replay("POST /items HTTP/1.1\nContent-Type: application/json\n\n{\"name\":\"x\"}")
    .unwrap();
  eventually("replay", || engine.replayed().len() == 1).await;
  shutdown.shutdown();
  let (proxy, _) = handle.await.unwrap();

  let replayed = &engine.replayed()[0];
  assert_eq!(*replayed.request.method(), Method::POST);
  assert_eq!(replayed.request.uri().to_string(), "https://app.test/items");
  assert_eq!(replayed.request.headers()["content-type"], "application/json");
  assert_eq!(replayed.request.body().as_ref(), b"{\"name\":\"x\"}");

  let stored = proxy.registry().get(&FlowId::new("f1")).unwrap();
  assert_eq!(*stored.request.method(), Method::GET);
  assert_eq!(stored.request.path(), "/items?page=1");
  assert!(stored.request.body().is_empty());
}

#[tokio::test]
async fn test_replay_of_unknown_flow_is_a_no_op() {
  let (ui, proxy, mut browser) = command_bus();
  let engine = MockEngine::new();
  let (shutdown, handle) = start_proxy(&engine, proxy).await;

  ui.commands
    .send(ProxyCommand::Replay {
      flow_id: FlowId::new("ghost"),
      raw_request: "GET / HTTP/1.1\n\n".to_string(),
    })
    .unwrap();
  ui.commands
    .send(ProxyCommand::Replay {
      flow_id: FlowId::new("ghost"),
      raw_request: "not a request".to_string(),
    })
    .unwrap();
  ui.commands
    .send(ProxyCommand::RenderInBrowser("still alive".to_string()))
    .unwrap();

  let mut forwarded = Vec::new();
  eventually("loop survives", || {
    forwarded.extend(browser.commands.drain());
    !forwarded.is_empty()
  })
  .await;
  assert_eq!(forwarded, vec![BrowserCommand::Render("still alive".to_string())]);

  shutdown.shutdown();
  let (proxy, result) = handle.await.unwrap();
  assert!(result.is_ok());
  assert!(engine.replayed().is_empty());
  assert!(proxy.registry().is_empty());
}

#[tokio::test]
async fn test_commands_queued_before_start_arrive_in_order() {
  let (ui, proxy, mut browser) = command_bus();
  for i in 0..50 {
    ui.commands
      .send(ProxyCommand::ReplayInBrowser(format!("GET /{} HTTP/1.1\n\n", i)))
      .unwrap();
  }
  let engine = MockEngine::new();
  let (shutdown, handle) = start_proxy(&engine, proxy).await;

  let mut forwarded = Vec::new();
  eventually("all commands", || {
    forwarded.extend(browser.commands.drain());
    forwarded.len() == 50
  })
  .await;
  let expected: Vec<_> = (0..50)
    .map(|i| BrowserCommand::Replay(format!("GET /{} HTTP/1.1\n\n", i)))
    .collect();
  assert_eq!(forwarded, expected);

  shutdown.shutdown();
  handle.await.unwrap();
}

#[tokio::test]
async fn test_scope_command_filters_later_captures() {
  let (ui, proxy, mut browser) = command_bus();
  let engine = MockEngine::new();
  let (shutdown, handle) = start_proxy(&engine, proxy).await;
  ui.commands
    .send(ProxyCommand::SetScope("https://*.example.com/*".to_string()))
    .unwrap();
  ui.commands
    .send(ProxyCommand::RenderInBrowser("marker".to_string()))
    .unwrap();
  eventually("scope applied", || !browser.commands.drain().is_empty()).await;
  let mut history = History::new(ui);

  engine
    .exchange(exchange("out", "https://example.com/", "text/html", ""))
    .await;
  engine
    .exchange(exchange("in", "https://api.example.com/v1/x", "application/json", "{}"))
    .await;
  eventually("in-scope capture", || {
    history.tick();
    !history.is_empty()
  })
  .await;

  shutdown.shutdown();
  let (proxy, _) = handle.await.unwrap();
  history.tick();
  assert_eq!(history.len(), 1);
  assert_eq!(history.rows()[0].url, "https://api.example.com/v1/x");
  assert_eq!(proxy.scope().pattern(), "https://*.example.com/*");
}

#[tokio::test]
async fn test_terminated_proxy_cannot_restart() {
  let (_ui, proxy, _browser) = command_bus();
  let engine = MockEngine::new();
  let (shutdown, handle) = start_proxy(&engine, proxy).await;
  shutdown.shutdown();
  let (mut proxy, result) = handle.await.unwrap();
  assert!(result.is_ok());
  assert_eq!(proxy.state(), OrchestratorState::Terminal);
  assert!(matches!(proxy.run().await, Err(Error::Lifecycle(_))));
}

#[tokio::test]
async fn test_closed_ui_channel_stops_proxy() {
  let (ui, proxy, _browser) = command_bus();
  let engine = MockEngine::new();
  let (_shutdown, handle) = start_proxy(&engine, proxy).await;
  drop(ui);
  let (proxy, result) = handle.await.unwrap();
  assert!(result.is_ok());
  assert_eq!(proxy.state(), OrchestratorState::Terminal);
}

#[tokio::test]
async fn test_engine_failure_ends_proxy_with_error() {
  let (_ui, proxy, _browser) = command_bus();
  let engine = MockEngine::failing("listener died");
  let (shutdown, handle) = start_proxy(&engine, proxy).await;
  shutdown.shutdown();
  let (proxy, result) = handle.await.unwrap();
  assert!(matches!(result, Err(Error::Transport(msg)) if msg == "listener died"));
  assert_eq!(proxy.state(), OrchestratorState::Terminal);
}

#[tokio::test]
async fn test_browser_renders_and_stops_on_disconnect() {
  let (_ui, proxy, browser) = command_bus();
  let session = MockSession::new();
  let generator = MockGenerator::new(Vec::<String>::new());
  let handle = start_browser(&session, &generator, browser);

  proxy
    .browser
    .send(BrowserCommand::Render("<h1>rendered</h1>".to_string()))
    .unwrap();
  eventually("render", || {
    session
      .calls()
      .contains(&SessionCall::SetContent("<h1>rendered</h1>".to_string()))
  })
  .await;
  session.disconnect();
  let (browser, result) = handle.await.unwrap();
  assert!(result.is_ok());
  assert_eq!(browser.state(), OrchestratorState::Terminal);

  let calls = session.calls();
  assert_eq!(calls[0], SessionCall::Expose(PROMPT_FUNCTION.to_string()));
  assert_eq!(calls[1], SessionCall::InitScript);
  assert_eq!(calls[2], SessionCall::Goto("about:blank".to_string()));
  assert!(!calls.contains(&SessionCall::Close));
}

#[tokio::test]
async fn test_browser_replay_uses_in_page_fetch() {
  let (_ui, proxy, browser) = command_bus();
  let session = MockSession::new();
  let generator = MockGenerator::new(Vec::<String>::new());
  let handle = start_browser(&session, &generator, browser);

  proxy
    .browser
    .send(BrowserCommand::Replay("broken".to_string()))
    .unwrap();
  proxy
    .browser
    .send(BrowserCommand::Replay(
      "GET /search?q=1 HTTP/1.1\nHost: app.test\nCookie: s=1\nAccept: text/html\n\nignored".to_string(),
    ))
    .unwrap();
  eventually("fetch", || !session.evaluations_of(FETCH_SCRIPT).is_empty()).await;
  session.disconnect();
  handle.await.unwrap();

  let fetches = session.evaluations_of(FETCH_SCRIPT);
  assert_eq!(fetches.len(), 1);
  assert_eq!(
    fetches[0],
    json!({
      "url": "/search?q=1",
      "method": "GET",
      "headers": {"accept": "text/html"},
      "body": null,
    })
  );
}

#[tokio::test]
async fn test_browser_closes_session_when_commands_end() {
  let (ui, proxy, browser) = command_bus();
  let session = MockSession::new();
  let generator = MockGenerator::new(Vec::<String>::new());
  let handle = start_browser(&session, &generator, browser);

  eventually("setup", || session.exposed().is_some()).await;
  drop(proxy);
  drop(ui);
  let (_, result) = handle.await.unwrap();
  assert!(result.is_ok());
  assert_eq!(session.calls().last(), Some(&SessionCall::Close));
}

#[tokio::test]
async fn test_prompt_from_page_is_answered_in_page() {
  let (_ui, _proxy, browser) = command_bus();
  let session = MockSession::new();
  let generator = MockGenerator::new(vec![r#"{"isOnlyAnswer": true, "result": "It is a login page."}"#]);
  let handle = start_browser(&session, &generator, browser);

  eventually("setup", || session.exposed().is_some()).await;
  let page_function = session.exposed().unwrap();
  page_function
    .call(vec![json!("what is this page?"), json!("<form></form>"), json!("https://app.test/login")])
    .await
    .unwrap();
  eventually("answer", || !session.evaluations_of(SHOW_RESPONSE_SCRIPT).is_empty()).await;
  session.disconnect();
  handle.await.unwrap();

  assert_eq!(generator.calls(), 1);
  let prompt = &generator.prompts()[0];
  assert!(prompt.contains("what is this page?"));
  assert!(prompt.contains("<form></form>"));
  assert!(prompt.contains("https://app.test/login"));
  assert_eq!(
    session.evaluations_of(SHOW_RESPONSE_SCRIPT),
    vec![json!("It is a login page.")]
  );
}
