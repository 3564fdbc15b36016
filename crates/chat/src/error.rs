use {
    parley_common::{MessageId, ThreadId},
    thiserror::Error,
};

/// Everything that can go wrong while processing one chat message.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("rate limited, retry after {retry_after_seconds}s")]
    AdmissionDenied { retry_after_seconds: u64 },

    #[error("agent timed out: {message}")]
    AgentTimeout { message: String },

    #[error("agent transport failure: {message}")]
    AgentTransport { message: String },

    #[error("message {message_id} vanished before it was processed")]
    MessageVanished { message_id: MessageId },

    #[error("no active session for thread {thread_id}")]
    SessionNotFound { thread_id: ThreadId },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error(transparent)]
    Store(#[from] parley_sessions::Error),

    #[error(transparent)]
    Channel(#[from] parley_channels::Error),
}

impl ChatError {
    #[must_use]
    pub fn configuration(message: impl std::fmt::Display) -> Self {
        Self::Configuration {
            message: message.to_string(),
        }
    }

    /// Text posted to the thread. Never contains internals beyond the
    /// one-line cause.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::AdmissionDenied {
                retry_after_seconds,
            } => format!(
                "You are sending messages too quickly. Please try again in {retry_after_seconds} seconds."
            ),
            Self::AgentTimeout { .. } => {
                "The agent ran out of time and was stopped. Send your message again to retry."
                    .to_string()
            },
            Self::AgentTransport { message } => {
                format!("The agent failed to respond ({message}). Send your message again to retry.")
            },
            Self::MessageVanished { .. } => String::new(),
            Self::SessionNotFound { .. } => {
                "No active session for this thread. Please start a new thread to talk to an agent."
                    .to_string()
            },
            Self::Configuration { message } => {
                format!("This thread's agent is misconfigured: {message}")
            },
            Self::Store(_) => {
                "Failed to save the conversation. Please try again in a moment.".to_string()
            },
            Self::Channel(_) => "Failed to deliver a message to this thread.".to_string(),
        }
    }

    /// Vanished messages are skipped silently.
    #[must_use]
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, Self::MessageVanished { .. })
    }

    /// Failures written to the thread's session log as an `[error]` turn.
    /// Skipped, throttled and sessionless messages leave no trace there.
    #[must_use]
    pub fn is_recorded(&self) -> bool {
        !matches!(
            self,
            Self::AdmissionDenied { .. }
                | Self::MessageVanished { .. }
                | Self::SessionNotFound { .. }
        )
    }

    /// Errors that stop the whole drain instead of one message.
    #[must_use]
    pub fn aborts_drain(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::AdmissionDenied { .. } => "admission_denied",
            Self::AgentTimeout { .. } => "agent_timeout",
            Self::AgentTransport { .. } => "agent_transport",
            Self::MessageVanished { .. } => "message_vanished",
            Self::SessionNotFound { .. } => "session_not_found",
            Self::Configuration { .. } => "configuration",
            Self::Store(_) => "store",
            Self::Channel(_) => "channel",
        }
    }
}

impl From<parley_agents::Error> for ChatError {
    fn from(err: parley_agents::Error) -> Self {
        match err {
            parley_agents::Error::Timeout { message } => Self::AgentTimeout { message },
            parley_agents::Error::CliNotFound => Self::configuration(err),
            other => Self::AgentTransport {
                message: other.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
