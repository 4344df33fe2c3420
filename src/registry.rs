//! In-memory index of captured live flows

use crate::errors::{Error, Result};
use crate::flow::{Flow, FlowId};
use std::collections::HashMap;
use std::sync::Arc;

/// Maps flow identifiers to the engine's live flows.
///
/// Owned by the proxy orchestrator: a single writer and a single reader, so
/// no locking. Entries are write-once and are never mutated; replay works on
/// [`FlowRegistry::clone_for_replay`].
#[derive(Debug, Default)]
pub struct FlowRegistry {
  flows: HashMap<FlowId, Arc<Flow>>,
}

impl FlowRegistry {
  /// Empty registry
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a captured flow.
  ///
  /// Returns `false` and keeps the existing entry when the identifier is
  /// already known.
  pub fn register(&mut self, flow: Arc<Flow>) -> bool {
    let id = flow.id().clone();
    if self.flows.contains_key(&id) {
      tracing::warn!("[CAPTURE] Flow {} already registered; keeping first capture", id);
      return false;
    }
    self.flows.insert(id, flow);
    true
  }

  /// Shared handle to a registered flow
  pub fn get(&self, id: &FlowId) -> Option<Arc<Flow>> {
    self.flows.get(id).cloned()
  }

  /// Independent copy of a registered flow, safe to mutate
  pub fn clone_for_replay(&self, id: &FlowId) -> Result<Flow> {
    self
      .flows
      .get(id)
      .map(|flow| Flow::clone(flow))
      .ok_or_else(|| Error::RegistryMiss(id.clone()))
  }

  /// Whether `id` is registered
  pub fn contains(&self, id: &FlowId) -> bool {
    self.flows.contains_key(id)
  }

  /// Number of registered flows
  pub fn len(&self) -> usize {
    self.flows.len()
  }

  /// Whether nothing was captured yet
  pub fn is_empty(&self) -> bool {
    self.flows.is_empty()
  }
}
