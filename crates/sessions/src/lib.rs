//! Thread sessions and their conversation log.
//!
//! A session binds one chat thread to an actor, an agent profile and the
//! agent's continuation token. Turns and tool invocations are appended as the
//! agent works and are never rewritten.

pub mod error;
pub mod model;
pub mod store;

pub use {
    error::{Error, Result},
    model::{ConversationTurn, Session, StoreStats, ToolInvocationRecord, TurnRole},
    store::{SessionStore, SqliteSessionStore},
};

/// Run database migrations for the sessions crate.
///
/// Creates the `threads`, `conversation_turns` and `tool_invocations` tables.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
