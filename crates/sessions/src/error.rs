use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("session already exists for thread {thread_id}")]
    AlreadyExists { thread_id: String },

    #[error("no session for thread {thread_id}")]
    NotFound { thread_id: String },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn already_exists(thread_id: impl ToString) -> Self {
        Self::AlreadyExists {
            thread_id: thread_id.to_string(),
        }
    }

    #[must_use]
    pub fn not_found(thread_id: impl ToString) -> Self {
        Self::NotFound {
            thread_id: thread_id.to_string(),
        }
    }
}

impl parley_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

parley_common::impl_context!();
