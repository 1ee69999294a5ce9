//! AI backend: role-tagged conversation history and the `ChatBackend` trait the IM worker talks to.
//!
//! The backend is stateless: every call receives the full history of the session, so the
//! conversation lives in [`crate::im::session::ChatSession`] rather than inside a client object.

pub mod gemini;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use gemini::GeminiBackend;

/// Who authored one turn of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Model => write!(f, "model"),
        }
    }
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, text: text.into() }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self { role: Role::Model, text: text.into() }
    }
}

/// Error from a backend call (network, auth, quota, blocked content).
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("prompt blocked: {0}")]
    Blocked(String),
    #[error("backend returned no text")]
    EmptyResponse,
    #[error("{0}")]
    Other(String),
}

/// Conversational AI backend. `history` is the whole session, oldest first, ending with the
/// user turn to answer.
#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    async fn generate(&self, history: &[ChatMessage]) -> Result<String, BackendError>;

    /// Model name for logging.
    fn model(&self) -> &str;
}
