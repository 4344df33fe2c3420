//! Execution contexts for the orchestrators

use crate::errors::Result;
use std::future::Future;
use std::thread::JoinHandle;

/// Lifecycle of an orchestrator.
///
/// `Idle → Starting → Running → Terminal`; a terminal orchestrator never runs
/// again, a new instance is needed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrchestratorState {
  /// Built, not started
  Idle,
  /// Engine/session being brought up
  Starting,
  /// Engine loop and command-poll loop running together
  Running,
  /// Finished; cannot be restarted
  Terminal,
}

impl OrchestratorState {
  /// Whether `run` may still be called
  pub fn can_start(self) -> bool {
    self == OrchestratorState::Idle
  }
}

/// Run `make()` to completion on a dedicated thread with its own
/// single-threaded tokio runtime.
///
/// Everything spawned by the future stays on that thread, so the two
/// activities of an orchestrator interleave cooperatively.
pub fn spawn_context<F, Fut>(name: &str, make: F) -> Result<JoinHandle<()>>
where
  F: FnOnce() -> Fut + Send + 'static,
  Fut: Future<Output = ()>,
{
  let thread_name = name.to_string();
  let handle = std::thread::Builder::new()
    .name(thread_name.clone())
    .spawn(move || {
      let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
      {
        Ok(runtime) => runtime,
        Err(e) => {
          tracing::error!("[{}] Failed to build runtime: {}", thread_name, e);
          return;
        }
      };
      let local = tokio::task::LocalSet::new();
      local.block_on(&runtime, make());
      tracing::debug!("[{}] Context finished", thread_name);
    })?;
  Ok(handle)
}
