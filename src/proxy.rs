//! Proxy context: engine loop plus command polling

use crate::capture::{CaptureFilterChain, ResponseVerdict};
use crate::command::{BrowserCommand, ProxyCommand, ProxyEndpoint};
use crate::config::Config;
use crate::context::OrchestratorState;
use crate::engine::{CaptureHooks, FlowHooks, InterceptEngine};
use crate::errors::{Error, Result};
use crate::flow::{CapturedFlow, Flow, FlowId};
use crate::registry::FlowRegistry;
use crate::replay::prepare_replay;
use crate::scope::ScopeFilter;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Owns the intercepting engine and everything the capture pipeline needs.
///
/// Scope and registry live here and are touched only from [`run`]'s loop,
/// which interleaves three things: the engine task finishing, finished flows
/// coming back from the hooks, and non-blocking command polls with a fixed
/// sleep in between.
///
/// [`run`]: ProxyOrchestrator::run
pub struct ProxyOrchestrator {
  config: Config,
  engine: Arc<dyn InterceptEngine>,
  chain: Arc<CaptureFilterChain>,
  registry: FlowRegistry,
  scope: ScopeFilter,
  endpoint: ProxyEndpoint,
  state: OrchestratorState,
}

/// Cloneable handle asking a running proxy to stop
#[derive(Clone)]
pub struct ProxyShutdown {
  engine: Arc<dyn InterceptEngine>,
}

impl ProxyShutdown {
  /// Ask the engine to stop; the orchestrator exits once it has
  pub fn shutdown(&self) {
    tracing::info!("[PROXY] Shutdown requested");
    self.engine.shutdown();
  }
}

impl ProxyOrchestrator {
  /// Orchestrator with the standard capture chain built from `config`
  pub fn new(config: Config, engine: Arc<dyn InterceptEngine>, endpoint: ProxyEndpoint) -> Self {
    let chain = Arc::new(CaptureFilterChain::from_config(&config));
    Self {
      config,
      engine,
      chain,
      registry: FlowRegistry::new(),
      scope: ScopeFilter::disabled(),
      endpoint,
      state: OrchestratorState::Idle,
    }
  }

  /// Replace the capture chain
  pub fn with_chain(mut self, chain: CaptureFilterChain) -> Self {
    self.chain = Arc::new(chain);
    self
  }

  /// Current lifecycle state
  pub fn state(&self) -> OrchestratorState {
    self.state
  }

  /// Flows captured so far
  pub fn registry(&self) -> &FlowRegistry {
    &self.registry
  }

  /// Scope currently in effect
  pub fn scope(&self) -> &ScopeFilter {
    &self.scope
  }

  /// Handle that stops the engine from another task or thread
  pub fn shutdown_handle(&self) -> ProxyShutdown {
    ProxyShutdown {
      engine: self.engine.clone(),
    }
  }

  /// Run the engine and the command-poll loop until the engine stops.
  ///
  /// Handler failures are logged and never end the loop. A closed UI
  /// command channel is treated as a shutdown request.
  pub async fn run(&mut self) -> Result<()> {
    if !self.state.can_start() {
      return Err(Error::lifecycle_error(format!(
        "proxy orchestrator is {:?}, a new instance is required",
        self.state
      )));
    }
    self.state = OrchestratorState::Starting;
    let result = self.run_loops().await;
    self.state = OrchestratorState::Terminal;
    tracing::info!("[PROXY] Orchestrator terminated");
    result
  }

  async fn run_loops(&mut self) -> Result<()> {
    tracing::info!("[PROXY] Starting engine on {}", self.config.listen_addr());
    let (finished_tx, mut finished_rx) = mpsc::unbounded_channel();
    let hooks: Arc<dyn FlowHooks> = Arc::new(CaptureHooks::new(self.chain.clone(), finished_tx));
    let engine = self.engine.clone();
    let mut engine_loop = tokio::spawn(async move { engine.run(hooks).await });
    self.state = OrchestratorState::Running;

    let mut polling = true;
    let joined = loop {
      if polling {
        match self.endpoint.commands.try_next() {
          Ok(Some(command)) => {
            self.dispatch(command).await;
            continue;
          }
          Ok(None) => {}
          Err(e) => {
            tracing::info!("[PROXY] {}; stopping engine", e);
            polling = false;
            self.engine.shutdown();
          }
        }
      }
      tokio::select! {
        joined = &mut engine_loop => break joined,
        Some(flow) = finished_rx.recv() => self.on_finished(flow),
        _ = tokio::time::sleep(self.config.poll_interval) => {}
      }
    };

    while let Ok(flow) = finished_rx.try_recv() {
      self.on_finished(flow);
    }

    match joined {
      Ok(Ok(())) => {
        tracing::info!("[PROXY] Engine stopped");
        Ok(())
      }
      Ok(Err(e)) => {
        tracing::error!("[PROXY] Engine failed: {}", e);
        Err(e)
      }
      Err(e) => Err(Error::transport_error(format!("engine task failed: {}", e))),
    }
  }

  /// Response phase for one finished flow: filter, register, publish
  fn on_finished(&mut self, flow: Arc<Flow>) {
    match self.chain.on_response_phase(&flow, &self.scope) {
      ResponseVerdict::Drop(_) => {}
      ResponseVerdict::Capture => {
        let captured = CapturedFlow::from(flow.as_ref());
        if !self.registry.register(flow) {
          return;
        }
        if let Err(e) = self.endpoint.captures.send(captured) {
          tracing::warn!("[PROXY] Failed to publish capture: {}", e);
        }
      }
    }
  }

  async fn dispatch(&mut self, command: ProxyCommand) {
    match command {
      ProxyCommand::Replay {
        flow_id,
        raw_request,
      } => self.replay(&flow_id, &raw_request).await,
      ProxyCommand::SetScope(pattern) => self.set_scope(&pattern),
      ProxyCommand::ReplayInBrowser(raw_request) => {
        self.forward(BrowserCommand::Replay(raw_request))
      }
      ProxyCommand::RenderInBrowser(body) => self.forward(BrowserCommand::Render(body)),
    }
  }

  async fn replay(&mut self, flow_id: &FlowId, raw_request: &str) {
    tracing::info!("[PROXY] Replay requested for flow {}", flow_id);
    let flow = match prepare_replay(&self.registry, flow_id, raw_request) {
      Ok(flow) => flow,
      Err(e) => {
        tracing::warn!("[PROXY] Replay of flow {} aborted: {}", flow_id, e);
        return;
      }
    };
    tracing::info!(
      "[PROXY] Replaying {} {}",
      flow.request.method(),
      flow.request.uri()
    );
    if let Err(e) = self.engine.replay_client(flow).await {
      tracing::error!("[PROXY] Engine replay of flow {} failed: {}", flow_id, e);
    }
  }

  fn set_scope(&mut self, pattern: &str) {
    self.scope = ScopeFilter::new(pattern);
    if self.scope.is_active() {
      tracing::info!("[PROXY] Scope set to {}", self.scope.pattern());
    } else {
      tracing::info!("[PROXY] Scope cleared");
    }
  }

  fn forward(&self, command: BrowserCommand) {
    if let Err(e) = self.endpoint.browser.send(command) {
      tracing::warn!("[PROXY] Browser is not listening: {}", e);
    }
  }
}
