use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The invocation ran past its wall-clock or turn budget.
    #[error("agent timed out: {message}")]
    Timeout { message: String },

    /// The agent process misbehaved: bad exit, broken pipe, missing result.
    #[error("agent transport failure: {message}")]
    Transport { message: String },

    #[error("failed to launch agent CLI {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("agent CLI not found; set PARLEY_AGENT_CLI or agent.cli_path")]
    CliNotFound,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl parley_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Transport { message }
    }
}

pub type AgentError = Error;
pub type Result<T> = std::result::Result<T, Error>;

parley_common::impl_context!();
