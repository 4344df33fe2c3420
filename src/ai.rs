//! AI page patching
//!
//! The operator types a prompt into the page overlay; the model answers with
//! one JSON object
//!
//! ```json
//! {"isOnlyAnswer": false, "result": "...", "updates": [
//!   {"selector": "h1", "action": "replace", "content": "Hello"}
//! ]}
//! ```
//!
//! whose `result` is shown in the overlay and whose `updates` are applied to
//! the live DOM in order.

use crate::browser::BrowserSession;
use crate::config::AiConfig;
use crate::errors::{Error, Result};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Resets the overlay response area and writes one message into it
pub const SHOW_RESPONSE_SCRIPT: &str = r#"(text) => {
  if (window.startAiResponse) window.startAiResponse();
  if (window.appendAiResponse) window.appendAiResponse(text);
}"#;

/// Hands one patch operation to the overlay's DOM-mutation entry point
pub const APPLY_UPDATE_SCRIPT: &str =
  r#"(op) => (window.applyAiUpdate ? window.applyAiUpdate(op) : false)"#;

/// Prefix of every message shown for a failed prompt
pub const ERROR_PREFIX: &str = "[AI Error]";

/// A generative-text provider: one prompt in, text chunks out
#[async_trait::async_trait]
pub trait TextGenerator: Send + Sync {
  /// Start generating for `prompt` with the model and credential in `config`
  async fn stream(
    &self,
    config: &AiConfig,
    prompt: String,
  ) -> Result<BoxStream<'static, Result<String>>>;
}

/// DOM mutation kinds the page understands
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchAction {
  /// Replace the inner HTML of matched elements
  Replace,
  /// Append HTML to matched elements
  Append,
  /// Prepend HTML to matched elements
  Prepend,
  /// Remove matched elements
  Remove,
  /// Inject a stylesheet
  Style,
  /// Execute script
  Jscode,
}

/// One DOM mutation requested by the model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
  /// CSS selector; only `jscode` may omit it
  pub selector: Option<String>,
  /// What to do with the matched elements
  pub action: PatchAction,
  /// HTML, CSS or script depending on `action`
  #[serde(default)]
  pub content: String,
}

impl PatchOperation {
  /// Whether the operation can be handed to the page
  pub fn is_applicable(&self) -> bool {
    match self.action {
      PatchAction::Jscode => true,
      _ => self
        .selector
        .as_deref()
        .map(|s| !s.trim().is_empty())
        .unwrap_or(false),
    }
  }
}

/// The structured answer extracted from the model output
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiResponse {
  /// `true` when the answer is text only and no update should be applied
  #[serde(default)]
  pub is_only_answer: bool,
  /// Text shown to the operator
  pub result: String,
  /// DOM mutations, applied in order
  #[serde(default)]
  pub updates: Option<Vec<PatchOperation>>,
}

impl AiResponse {
  /// Operations to apply; empty for text-only answers
  pub fn applicable_updates(&self) -> &[PatchOperation] {
    match (&self.updates, self.is_only_answer) {
      (Some(updates), false) => updates,
      _ => &[],
    }
  }
}

/// Assemble the model instruction for one prompt
pub fn build_prompt(prompt: &str, html: Option<&str>, url: Option<&str>) -> String {
  let mut text = String::new();
  if let Some(url) = url {
    text.push_str("Current URL:\n");
    text.push_str(url);
    text.push_str("\n\n");
  }
  if let Some(html) = html {
    text.push_str("Current page HTML:\n```html\n");
    text.push_str(html);
    text.push_str("\n```\n\n");
  }
  text.push_str("User request:\n");
  text.push_str(prompt);
  text.push_str("\n\n");
  text.push_str(INSTRUCTIONS);
  text
}

const INSTRUCTIONS: &str = r#"You are assisting a web security tester who is looking at the page above.
Answer with exactly one JSON object and no other text, using this schema:
{
  "isOnlyAnswer": boolean,
  "result": string,
  "updates": [
    {
      "selector": string | null,
      "action": "replace" | "append" | "prepend" | "remove" | "style" | "jscode",
      "content": string
    }
  ]
}
Set "isOnlyAnswer" to true when the request only asks a question; "updates" is then ignored.
"result" is the explanation shown to the user.
"replace", "append" and "prepend" put "content" as HTML into the elements matching "selector".
"remove" deletes the matching elements. "style" adds "content" as CSS.
"jscode" runs "content" as JavaScript in the page; its "selector" may be null."#;

/// The first top-level JSON object in `text`, if any.
///
/// Braces inside string literals and escaped quotes are skipped, so prose
/// around the object and braces inside its strings do not confuse it.
pub fn extract_json_object(text: &str) -> Option<&str> {
  json_objects(text).next()
}

/// Parse the first JSON object in `text` that has the answer's shape
pub fn parse_response(text: &str) -> Result<AiResponse> {
  for candidate in json_objects(text) {
    match serde_json::from_str::<AiResponse>(candidate) {
      Ok(response) => return Ok(response),
      Err(e) => tracing::debug!("[AI] Skipping JSON candidate: {}", e),
    }
  }
  Err(Error::ResponseFormat {
    raw: text.to_string(),
  })
}

// Outermost balanced objects in order of appearance, found in one pass.
// A `{` that is never closed is ignored, so it does not hide later objects.
fn json_objects(text: &str) -> impl Iterator<Item = &str> {
  let mut open = Vec::new();
  let mut spans = Vec::new();
  let mut in_string = false;
  let mut escaped = false;
  for (i, b) in text.bytes().enumerate() {
    if in_string {
      match b {
        _ if escaped => escaped = false,
        b'\\' => escaped = true,
        b'"' => in_string = false,
        _ => {}
      }
      continue;
    }
    match b {
      // quotes in prose outside any object are not strings
      b'"' if !open.is_empty() => in_string = true,
      b'{' => open.push(i),
      b'}' => {
        if let Some(start) = open.pop() {
          spans.push((start, i + 1));
        }
      }
      _ => {}
    }
  }
  // balanced spans are nested or disjoint; keep the ones no other span holds
  spans.sort_unstable();
  let mut covered = 0;
  spans
    .into_iter()
    .filter(move |&(start, end)| {
      if start < covered {
        return false;
      }
      covered = end;
      true
    })
    .map(move |(start, end)| &text[start..end])
}

/// Runs one prompt end to end against a page
pub struct AiPatchProtocol {
  config: AiConfig,
  generator: Arc<dyn TextGenerator>,
}

impl AiPatchProtocol {
  /// Protocol using `generator` with the settings in `config`
  pub fn new(config: AiConfig, generator: Arc<dyn TextGenerator>) -> Self {
    Self { config, generator }
  }

  /// Settings in use
  pub fn config(&self) -> &AiConfig {
    &self.config
  }

  /// Handle one prompt.
  ///
  /// Never fails: every error ends up as an `[AI Error]` message in the
  /// page overlay.
  pub async fn handle_prompt(
    &self,
    page: &dyn BrowserSession,
    prompt: &str,
    html: Option<&str>,
    url: Option<&str>,
  ) {
    tracing::info!("[AI] Prompt: {}", prompt);
    if let Err(e) = self.run_prompt(page, prompt, html, url).await {
      let message = match &e {
        Error::ResponseFormat { raw } => format!("{} {}\n\n{}", ERROR_PREFIX, e, raw),
        _ => format!("{} {}", ERROR_PREFIX, e),
      };
      tracing::warn!("[AI] {}", e);
      if let Err(e) = show_response(page, &message).await {
        tracing::error!("[AI] Could not show error in page: {}", e);
      }
    }
  }

  async fn run_prompt(
    &self,
    page: &dyn BrowserSession,
    prompt: &str,
    html: Option<&str>,
    url: Option<&str>,
  ) -> Result<()> {
    if !self.config.has_credential() {
      return Err(Error::Credential);
    }
    let text = self.generate(build_prompt(prompt, html, url)).await?;
    let response = parse_response(&text)?;
    show_response(page, &response.result).await?;
    apply_updates(page, response.applicable_updates()).await;
    Ok(())
  }

  async fn generate(&self, prompt: String) -> Result<String> {
    let mut chunks = self.generator.stream(&self.config, prompt).await?;
    let mut text = String::new();
    let mut count = 0usize;
    while let Some(chunk) = chunks.next().await {
      text.push_str(&chunk?);
      count += 1;
    }
    tracing::debug!("[AI] Received {} chunks, {} bytes", count, text.len());
    Ok(text)
  }
}

async fn show_response(page: &dyn BrowserSession, text: &str) -> Result<()> {
  page
    .evaluate(SHOW_RESPONSE_SCRIPT, serde_json::Value::String(text.to_string()))
    .await?;
  Ok(())
}

async fn apply_updates(page: &dyn BrowserSession, updates: &[PatchOperation]) {
  for (i, op) in updates.iter().enumerate() {
    if !op.is_applicable() {
      tracing::warn!("[AI] Update {} ({:?}) has no selector, skipped", i, op.action);
      continue;
    }
    let arg = match serde_json::to_value(op) {
      Ok(arg) => arg,
      Err(e) => {
        tracing::warn!("[AI] Update {} not serializable: {}", i, e);
        continue;
      }
    };
    match page.evaluate(APPLY_UPDATE_SCRIPT, arg).await {
      Ok(_) => tracing::debug!("[AI] Applied update {} ({:?})", i, op.action),
      Err(e) => tracing::warn!("[AI] Update {} failed: {}", i, e),
    }
  }
}
