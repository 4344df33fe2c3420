//! Command channels between the UI, proxy and browser contexts
//!
//! Three unbounded FIFO channels make up the bus:
//!
//! - UI → Proxy: [`ProxyCommand`]
//! - Proxy → Browser: [`BrowserCommand`] (the page's exposed prompt function
//!   feeds the same channel)
//! - Proxy → UI: [`CapturedFlow`] events
//!
//! Enqueue never blocks. Dequeue on the consumer side is non-blocking; an
//! empty channel means "nothing right now", only a dropped producer side
//! means the channel is finished.

use crate::errors::{Error, Result};
use crate::flow::{CapturedFlow, FlowId};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

/// Commands consumed by the proxy orchestrator
#[derive(Clone, Debug, PartialEq)]
pub enum ProxyCommand {
  /// Replay an edited request through the engine
  Replay {
    /// Captured flow the edit started from
    flow_id: FlowId,
    /// Edited raw request text
    raw_request: String,
  },
  /// Replace the capture scope; blank disables it
  SetScope(String),
  /// Send an edited request from inside the browser page
  ReplayInBrowser(String),
  /// Show a response body as the browser page
  RenderInBrowser(String),
}

/// Commands consumed by the browser orchestrator
#[derive(Clone, Debug, PartialEq)]
pub enum BrowserCommand {
  /// Issue the raw request with an in-page fetch
  Replay(String),
  /// Replace the page content with this HTML
  Render(String),
  /// Run the AI page-patching protocol
  AiPrompt {
    /// Operator prompt
    prompt: String,
    /// Page HTML to give the model as context
    html: Option<String>,
    /// Page URL to give the model as context
    url: Option<String>,
  },
}

/// Producer half of a bus channel
#[derive(Debug)]
pub struct CommandSender<T> {
  name: &'static str,
  inner: mpsc::UnboundedSender<T>,
}

impl<T> Clone for CommandSender<T> {
  fn clone(&self) -> Self {
    Self {
      name: self.name,
      inner: self.inner.clone(),
    }
  }
}

impl<T> CommandSender<T> {
  /// Enqueue without blocking; fails only when the consumer is gone
  pub fn send(&self, value: T) -> Result<()> {
    self
      .inner
      .send(value)
      .map_err(|_| Error::ChannelClosed(self.name))
  }

  /// Whether the consumer has gone away
  pub fn is_closed(&self) -> bool {
    self.inner.is_closed()
  }

  /// Producer that does not keep the channel open
  pub fn downgrade(&self) -> WeakCommandSender<T> {
    WeakCommandSender {
      name: self.name,
      inner: self.inner.downgrade(),
    }
  }
}

/// Producer half that only works while some strong [`CommandSender`] lives
#[derive(Debug)]
pub struct WeakCommandSender<T> {
  name: &'static str,
  inner: mpsc::WeakUnboundedSender<T>,
}

impl<T> Clone for WeakCommandSender<T> {
  fn clone(&self) -> Self {
    Self {
      name: self.name,
      inner: self.inner.clone(),
    }
  }
}

impl<T> WeakCommandSender<T> {
  /// Enqueue without blocking; fails once every strong producer or the consumer is gone
  pub fn send(&self, value: T) -> Result<()> {
    match self.inner.upgrade() {
      Some(sender) => sender
        .send(value)
        .map_err(|_| Error::ChannelClosed(self.name)),
      None => Err(Error::ChannelClosed(self.name)),
    }
  }
}

/// Consumer half of a bus channel
#[derive(Debug)]
pub struct CommandReceiver<T> {
  name: &'static str,
  inner: mpsc::UnboundedReceiver<T>,
}

impl<T> CommandReceiver<T> {
  /// Non-blocking dequeue.
  ///
  /// `Ok(None)` means no command is available right now;
  /// `Err(ChannelClosed)` means every producer is gone and the queue is drained.
  pub fn try_next(&mut self) -> Result<Option<T>> {
    match self.inner.try_recv() {
      Ok(value) => Ok(Some(value)),
      Err(TryRecvError::Empty) => Ok(None),
      Err(TryRecvError::Disconnected) => Err(Error::ChannelClosed(self.name)),
    }
  }

  /// Wait for the next value; `None` once every producer is gone
  pub async fn next(&mut self) -> Option<T> {
    self.inner.recv().await
  }

  /// Take everything queued right now, in order
  pub fn drain(&mut self) -> Vec<T> {
    let mut values = Vec::new();
    while let Ok(value) = self.inner.try_recv() {
      values.push(value);
    }
    values
  }
}

fn channel<T>(name: &'static str) -> (CommandSender<T>, CommandReceiver<T>) {
  let (tx, rx) = mpsc::unbounded_channel();
  (
    CommandSender { name, inner: tx },
    CommandReceiver { name, inner: rx },
  )
}

/// The UI context's ends of the bus
#[derive(Debug)]
pub struct UiEndpoint {
  /// Commands for the proxy
  pub commands: CommandSender<ProxyCommand>,
  /// Captured flows from the proxy
  pub captures: CommandReceiver<CapturedFlow>,
}

/// The proxy context's ends of the bus
#[derive(Debug)]
pub struct ProxyEndpoint {
  /// Commands from the UI
  pub commands: CommandReceiver<ProxyCommand>,
  /// Commands for the browser
  pub browser: CommandSender<BrowserCommand>,
  /// Captured flows for the UI
  pub captures: CommandSender<CapturedFlow>,
}

/// The browser context's ends of the bus
#[derive(Debug)]
pub struct BrowserEndpoint {
  /// Commands from the proxy and from the page itself
  pub commands: CommandReceiver<BrowserCommand>,
  /// Loopback producer handed to the page's exposed prompt function
  pub loopback: CommandSender<BrowserCommand>,
}

/// Create the three channels and split them per context
pub fn command_bus() -> (UiEndpoint, ProxyEndpoint, BrowserEndpoint) {
  let (proxy_tx, proxy_rx) = channel("proxy command");
  let (browser_tx, browser_rx) = channel("browser command");
  let (capture_tx, capture_rx) = channel("capture");
  (
    UiEndpoint {
      commands: proxy_tx,
      captures: capture_rx,
    },
    ProxyEndpoint {
      commands: proxy_rx,
      browser: browser_tx.clone(),
      captures: capture_tx,
    },
    BrowserEndpoint {
      commands: browser_rx,
      loopback: browser_tx,
    },
  )
}
