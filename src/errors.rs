//! workbench error
use crate::flow::FlowId;
use thiserror::Error as ThisError;
/// A `Result` alias where the `Err` case is `autositemap::Error`.
pub type Result<T> = std::result::Result<T, Error>;
/// The Errors that may occur inside the capture, replay and AI pipelines.
///
/// None of them is allowed to stop a running orchestrator: handlers catch
/// them at their boundary, log them and, where the operator can see it, show
/// them as a message.
#[derive(ThisError, Debug)]
pub enum Error {
  /// Scope pattern could not be compiled; the filter falls back to "match everything".
  #[error("invalid scope pattern `{pattern}`: {reason}")]
  FilterConfig {
    /// pattern as typed by the operator
    pattern: String,
    /// compiler diagnostic
    reason: String,
  },
  /// Replay referenced a flow the registry does not know
  #[error("no captured flow with id {0}")]
  RegistryMiss(FlowId),
  /// Edited raw request text could not be reconstructed
  #[error("malformed request text: {0}")]
  Parse(String),
  /// Engine or browser primitive failed
  #[error("transport error: {0}")]
  Transport(String),
  /// No AI credential configured
  #[error("AI API key is not configured")]
  Credential,
  /// AI output did not contain the expected JSON object
  #[error("AI response is not in the expected JSON format")]
  ResponseFormat {
    /// accumulated provider output
    raw: String,
  },
  /// The other end of a command channel is gone
  #[error("{0} channel closed")]
  ChannelClosed(&'static str),
  /// Orchestrator lifecycle misuse (e.g. running a terminated orchestrator)
  #[error("lifecycle error: {0}")]
  Lifecycle(String),
  /// http::Error
  #[error(transparent)]
  Http(http::Error),
  /// serde_json::Error
  #[error(transparent)]
  Json(#[from] serde_json::Error),
  /// Error
  #[error(transparent)]
  IO(#[from] std::io::Error),
}

impl Error {
  /// Create a parse error and log it
  pub fn parse_error(msg: impl Into<String>) -> Self {
    let error = Error::Parse(msg.into());
    tracing::debug!("Parse error: {}", error);
    error
  }

  /// Create a transport error and log it
  pub fn transport_error(msg: impl Into<String>) -> Self {
    let error = Error::Transport(msg.into());
    tracing::debug!("Transport error: {}", error);
    error
  }

  /// Create a lifecycle error and log it
  pub fn lifecycle_error(msg: impl Into<String>) -> Self {
    let error = Error::Lifecycle(msg.into());
    tracing::debug!("Lifecycle error: {}", error);
    error
  }
}

impl From<http::Error> for Error {
  fn from(value: http::Error) -> Self {
    Error::Http(value)
  }
}

impl From<http::header::InvalidHeaderValue> for Error {
  fn from(value: http::header::InvalidHeaderValue) -> Self {
    Error::Http(http::Error::from(value))
  }
}

impl From<http::header::InvalidHeaderName> for Error {
  fn from(value: http::header::InvalidHeaderName) -> Self {
    Error::Http(http::Error::from(value))
  }
}

impl From<http::method::InvalidMethod> for Error {
  fn from(value: http::method::InvalidMethod) -> Self {
    Error::Http(http::Error::from(value))
  }
}

impl From<http::uri::InvalidUri> for Error {
  fn from(value: http::uri::InvalidUri) -> Self {
    Error::Http(http::Error::from(value))
  }
}

impl From<http::uri::InvalidUriParts> for Error {
  fn from(value: http::uri::InvalidUriParts) -> Self {
    Error::Http(http::Error::from(value))
  }
}
