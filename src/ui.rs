//! History model behind the operator UI
//!
//! Presentation-free: a widget layer renders [`History::rows`], shows the
//! request and response texts of the selection, lets the operator edit
//! them and calls the action methods, which only enqueue commands.

use crate::command::{ProxyCommand, UiEndpoint};
use crate::errors::Result;
use crate::flow::{version_str, CapturedFlow};

/// First line of a formatted response
pub const HEADERS_MARKER: &str = "--- HEADERS ---";
/// Separator between response headers and body; the body starts after it
pub const BODY_MARKER: &str = "\n\n--- BODY ---\n";

/// One line of the history table
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryRow {
  /// Request method
  pub method: String,
  /// Full URL
  pub url: String,
  /// Status code or `No Response`
  pub status: String,
}

/// Editable request text: `METHOD PATH VERSION`, header lines, blank line, body
pub fn format_request(flow: &CapturedFlow) -> String {
  let mut text = format!(
    "{} {} {}\n",
    flow.method,
    flow.path,
    version_str(flow.version)
  );
  for (name, value) in &flow.request_headers {
    text.push_str(&format!("{}: {}\n", name, value));
  }
  text.push('\n');
  text.push_str(&String::from_utf8_lossy(&flow.request_body));
  text
}

/// Response text with its header and body sections marked
pub fn format_response(flow: &CapturedFlow) -> String {
  let mut text = format!("{}\n", HEADERS_MARKER);
  for (name, value) in &flow.response_headers {
    text.push_str(&format!("{}: {}\n", name, value));
  }
  text.push_str(&BODY_MARKER[1..]);
  text.push_str(&String::from_utf8_lossy(&flow.response_body));
  text
}

/// The body part of a (possibly edited) response text; empty without marker
pub fn response_body(text: &str) -> &str {
  text
    .split_once(BODY_MARKER)
    .map(|(_, body)| body)
    .unwrap_or("")
}

/// Captured flows in arrival order plus the operator's selection
pub struct History {
  endpoint: UiEndpoint,
  flows: Vec<CapturedFlow>,
  selected: Option<usize>,
}

impl History {
  /// Empty history on the UI end of the bus
  pub fn new(endpoint: UiEndpoint) -> Self {
    Self {
      endpoint,
      flows: Vec::new(),
      selected: None,
    }
  }

  /// Take every capture queued since the last tick; returns how many arrived
  pub fn tick(&mut self) -> usize {
    let arrived = self.endpoint.captures.drain();
    let count = arrived.len();
    self.flows.extend(arrived);
    count
  }

  /// Number of captured flows
  pub fn len(&self) -> usize {
    self.flows.len()
  }

  /// Whether nothing was captured yet
  pub fn is_empty(&self) -> bool {
    self.flows.is_empty()
  }

  /// Table rows in arrival order
  pub fn rows(&self) -> Vec<HistoryRow> {
    self
      .flows
      .iter()
      .map(|flow| HistoryRow {
        method: flow.method.to_string(),
        url: flow.url.clone(),
        status: flow.status_text(),
      })
      .collect()
  }

  /// Select a row; out of range clears the selection
  pub fn select(&mut self, index: Option<usize>) -> Option<&CapturedFlow> {
    self.selected = index.filter(|&i| i < self.flows.len());
    if index.is_some() && self.selected.is_none() {
      tracing::debug!("[CAPTURE] No row {:?} to select", index);
    }
    self.selection()
  }

  /// The selected flow
  pub fn selection(&self) -> Option<&CapturedFlow> {
    self.selected.and_then(|i| self.flows.get(i))
  }

  /// Request text of the selection
  pub fn request_text(&self) -> Option<String> {
    self.selection().map(format_request)
  }

  /// Response text of the selection
  pub fn response_text(&self) -> Option<String> {
    self.selection().map(format_response)
  }

  /// Replay the edited request through the proxy
  pub fn replay(&self, edited_request: &str) -> Result<()> {
    let Some(flow) = self.selection() else {
      tracing::info!("[CAPTURE] Nothing selected to replay");
      return Ok(());
    };
    self.endpoint.commands.send(ProxyCommand::Replay {
      flow_id: flow.flow_id.clone(),
      raw_request: edited_request.to_string(),
    })
  }

  /// Send the edited request from inside the browser page
  pub fn replay_in_browser(&self, edited_request: &str) -> Result<()> {
    if self.selection().is_none() {
      tracing::info!("[CAPTURE] Nothing selected to replay in the browser");
      return Ok(());
    }
    self
      .endpoint
      .commands
      .send(ProxyCommand::ReplayInBrowser(edited_request.to_string()))
  }

  /// Render the body of the (edited) response text in the browser
  pub fn render_in_browser(&self, edited_response: &str) -> Result<()> {
    if self.selection().is_none() {
      tracing::info!("[CAPTURE] Nothing selected to render");
      return Ok(());
    }
    self.endpoint.commands.send(ProxyCommand::RenderInBrowser(
      response_body(edited_response).to_string(),
    ))
  }

  /// Change the capture scope; blank disables it
  pub fn set_scope(&self, pattern: &str) -> Result<()> {
    self
      .endpoint
      .commands
      .send(ProxyCommand::SetScope(pattern.to_string()))
  }
}
