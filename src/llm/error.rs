//! Error type shared by every chat-completion call.
//!
//! Agent errors are not retried at the transport level. The task loop treats
//! them as one consumed attempt and moves on, so classification stays coarse.

use std::time::Duration;

use thiserror::Error;

/// Error from a chat-completion call.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The endpoint answered with a non-2xx status. The body is kept verbatim
    /// for the task log.
    #[error("endpoint returned HTTP {status}: {body}")]
    Endpoint { status: u16, body: String },

    /// Connection-level failure before a status line was received.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The per-agent deadline elapsed.
    #[error("request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The shared cancellation token fired mid-call.
    #[error("request cancelled")]
    Cancelled,

    /// A 2xx response with an empty `choices` array.
    #[error("no choices in response")]
    NoChoices,

    /// A 2xx response that did not deserialize as the chat-completion shape.
    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl AgentError {
    /// True when the error was caused by the shared cancellation token.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, AgentError::Cancelled)
    }
}
