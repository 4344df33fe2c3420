#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # autositemap
//!
//! The `autositemap` crate is the core of an intercepting HTTP(S) workbench.
//! An intercepting engine sits between a proxied browser and the network; the
//! crate decides which exchanges are worth keeping, shows them to the
//! operator, replays edited requests and patches the live page with AI.
//!
//! - Capture filtering: a request-time domain [blocklist][capture], and
//!   response-time [scope](ScopeFilter), extension and content-type rules
//! - [Replay](reconstruct) of operator-edited raw request text, through the
//!   engine or from inside the page
//! - AI page patching through a structured [JSON protocol][ai]
//!
//! The engine, the browser and the text provider are collaborators behind
//! traits ([`InterceptEngine`], [`browser::BrowserSession`],
//! [`ai::TextGenerator`]); adapters for real implementations live outside
//! this crate.
//!
//! ## Contexts
//!
//! Three contexts run concurrently and share nothing but the
//! [command bus](command::command_bus):
//!
//! - the UI drains captured flows into a [`History`] on a timer and turns
//!   operator actions into [`ProxyCommand`]s
//! - the [`ProxyOrchestrator`] runs the engine and polls proxy commands
//! - the [`BrowserOrchestrator`] drives the browser and polls browser commands
//!
//! Each orchestrator can be given its own thread and runtime with
//! [`spawn_context`].
//!
//! ## Reconstructing a request
//!
//! ```rust
//! # fn run() -> autositemap::Result<()> {
//! let raw = autositemap::reconstruct("GET /x HTTP/1.1\nHost: h\n\nbody")?;
//! assert_eq!(raw.method, autositemap::Method::GET);
//! assert_eq!(raw.path, "/x");
//! assert_eq!(raw.body.as_ref(), b"body");
//! # Ok(())
//! # }
//! # run().unwrap();
//! ```
//!
//! ## Scope
//!
//! ```rust
//! let scope = autositemap::ScopeFilter::new("https://*.example.com/*");
//! assert!(scope.matches("https://api.example.com/v1/x"));
//! assert!(!scope.matches("https://example.com/"));
//! ```
//!
//! ## Logging
//!
//! Everything is reported through [`tracing`] with a context tag
//! (`[PROXY]`, `[BROWSER]`, `[AI]`, `[CAPTURE]`). The crate never installs a
//! subscriber.

pub mod ai;
pub mod browser;
pub mod capture;
pub mod command;
pub mod config;
mod context;
pub mod engine;
mod errors;
mod flow;
mod proxy;
mod registry;
mod replay;
mod scope;
mod ui;

pub use browser::{BrowserOrchestrator, LaunchOptions};
pub use capture::CaptureFilterChain;
pub use command::{BrowserCommand, ProxyCommand};
pub use config::{AiConfig, Config};
pub use context::{spawn_context, OrchestratorState};
pub use engine::{FlowHooks, InterceptEngine};
pub use errors::{Error, Result};
pub use flow::{version_str, CapturedFlow, Flow, FlowId, FlowRequest, FlowResponse};
pub use http::header;
pub use http::Method;
pub use http::{StatusCode, Version};
pub use proxy::{ProxyOrchestrator, ProxyShutdown};
pub use registry::FlowRegistry;
pub use replay::{prepare_replay, reconstruct, RawRequest, DEFAULT_VERSION};
pub use scope::ScopeFilter;
pub use ui::{
  format_request, format_response, response_body, History, HistoryRow, BODY_MARKER, HEADERS_MARKER,
};
