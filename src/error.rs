//! Error taxonomy for queries and mutations.

use serde_json::Value;

/// Fallback user-facing message when the server supplies none.
pub const GENERIC_ERROR: &str = "Something went wrong, please try again";

/// Errors surfaced by queries and mutations.
///
/// Every variant is captured at the hook boundary and turned into state plus a
/// notification; nothing here is fatal to the process.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
  /// Transport failure: the request produced no response at all.
  #[error("network error: {0}")]
  Transport(String),

  /// The server responded with an error status and (possibly) a message body.
  #[error("{message}")]
  Server { status: Option<u16>, message: String },

  /// A pre/post-processing hook failed.
  #[error("hook failed: {0}")]
  Hook(String),

  /// The fetch was superseded or its owning scope ended before it resolved.
  #[error("query was cancelled")]
  Cancelled,
}

impl QueryError {
  /// Build a server error from a structured error body.
  ///
  /// Prefers a server-supplied `message` field, falling back to
  /// [`GENERIC_ERROR`].
  pub fn from_error_body(status: Option<u16>, body: &Value) -> Self {
    let message = body
      .get("message")
      .and_then(Value::as_str)
      .filter(|m| !m.is_empty())
      .unwrap_or(GENERIC_ERROR)
      .to_string();
    QueryError::Server { status, message }
  }

  /// The text shown to the user in an error notification.
  pub fn user_message(&self) -> String {
    match self {
      QueryError::Server { message, .. } => message.clone(),
      _ => GENERIC_ERROR.to_string(),
    }
  }
}
