//! Interfaces to the intercepting (MITM) engine

use crate::capture::{CaptureFilterChain, RequestVerdict};
use crate::errors::Result;
use crate::flow::Flow;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Lifecycle hooks the engine calls for every exchange.
///
/// An engine must kill the exchange when `on_request` answers
/// [`RequestVerdict::Block`]; that is its "kill this flow" primitive.
#[async_trait::async_trait]
pub trait FlowHooks: Send + Sync {
  /// Called once the request head is known, before it is forwarded
  async fn on_request(&self, flow: &Flow) -> RequestVerdict;

  /// Called when the exchange finished (with or without a response)
  async fn on_response(&self, flow: Arc<Flow>);
}

/// The intercepting engine as seen by the proxy orchestrator
#[async_trait::async_trait]
pub trait InterceptEngine: Send + Sync + 'static {
  /// Serve traffic until shut down, reporting exchanges to `hooks`.
  ///
  /// Returning ends the proxy context.
  async fn run(&self, hooks: Arc<dyn FlowHooks>) -> Result<()>;

  /// Send a mutated flow clone to the upstream server (client replay).
  ///
  /// The replayed exchange goes through the hooks like any other.
  async fn replay_client(&self, flow: Flow) -> Result<()>;

  /// Ask the engine to stop gracefully; `run` returns afterwards
  fn shutdown(&self);
}

/// [`FlowHooks`] used by the proxy orchestrator.
///
/// Request-phase decisions are made in place from the immutable blocklist;
/// finished flows are handed over to the orchestrator loop, which owns the
/// scope and the registry.
pub struct CaptureHooks {
  chain: Arc<CaptureFilterChain>,
  finished: mpsc::UnboundedSender<Arc<Flow>>,
}

impl CaptureHooks {
  /// Hooks feeding finished flows into `finished`
  pub fn new(chain: Arc<CaptureFilterChain>, finished: mpsc::UnboundedSender<Arc<Flow>>) -> Self {
    Self { chain, finished }
  }
}

#[async_trait::async_trait]
impl FlowHooks for CaptureHooks {
  async fn on_request(&self, flow: &Flow) -> RequestVerdict {
    let verdict = self.chain.on_request_phase(flow.request.host());
    if verdict == RequestVerdict::Block {
      tracing::debug!("[PROXY] Killing {} {}", flow.request.method(), flow.request.uri());
    }
    verdict
  }

  async fn on_response(&self, flow: Arc<Flow>) {
    if let Err(e) = self.finished.send(flow) {
      tracing::warn!("[PROXY] Orchestrator gone, dropping flow {}", e.0.id());
    }
  }
}
