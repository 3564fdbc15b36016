use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error("agent profile not found: {name}")]
    ProfileNotFound { name: String },

    #[error("invalid agent profile at {}: {message}", path.display())]
    InvalidProfile { path: PathBuf, message: String },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl std::fmt::Display) -> Self {
        Self::Message {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn invalid_profile(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Self::InvalidProfile {
            path: path.into(),
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn profile_not_found(name: impl Into<String>) -> Self {
        Self::ProfileNotFound { name: name.into() }
    }
}

impl parley_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

parley_common::impl_context!();
