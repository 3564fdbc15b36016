use std::{path::Path, str::FromStr};

use {
    async_trait::async_trait,
    parley_common::{ActorId, MessageId, ThreadId, now_ms},
    sqlx::{
        SqlitePool,
        sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    },
    tracing::debug,
};

#[cfg(feature = "metrics")]
use parley_metrics::{counter, labels, session as session_metrics};

use crate::{
    error::{Error, Result},
    model::{ConversationTurn, Session, StoreStats, ToolInvocationRecord, TurnRole},
};

/// Durable per-thread session state.
///
/// Every method is atomic on its own. Callers serialize work per thread, so no
/// cross-call transactions are offered.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, thread_id: &ThreadId) -> Result<Option<Session>>;

    /// Fails with [`Error::AlreadyExists`] if the thread already has a session.
    async fn create(
        &self,
        thread_id: &ThreadId,
        actor_id: &ActorId,
        agent_profile: &str,
    ) -> Result<Session>;

    /// Replace the thread's continuation token.
    async fn update_continuation_token(&self, thread_id: &ThreadId, token: &str) -> Result<()>;

    /// Append a conversation turn and bump the session's activity time.
    async fn append_turn(
        &self,
        thread_id: &ThreadId,
        role: TurnRole,
        content: &str,
        message_id: Option<&MessageId>,
    ) -> Result<i64>;

    async fn append_tool_record(
        &self,
        thread_id: &ThreadId,
        tool_name: &str,
        params: Option<&str>,
        result: Option<&str>,
    ) -> Result<i64>;

    /// Returns `false` if there was no session to deactivate.
    async fn set_inactive(&self, thread_id: &ThreadId) -> Result<bool>;

    async fn touch(&self, thread_id: &ThreadId) -> Result<()>;

    /// Turns in creation order, optionally capped to the first `limit`.
    async fn turns(&self, thread_id: &ThreadId, limit: Option<u32>)
    -> Result<Vec<ConversationTurn>>;

    /// The newest `count` turns, newest first.
    async fn recent_turns(&self, thread_id: &ThreadId, count: u32)
    -> Result<Vec<ConversationTurn>>;

    async fn tool_records(
        &self,
        thread_id: &ThreadId,
        limit: Option<u32>,
    ) -> Result<Vec<ToolInvocationRecord>>;

    /// Sessions owned by `actor_id`, most recently active first.
    async fn list_for_actor(&self, actor_id: &ActorId, active_only: bool) -> Result<Vec<Session>>;

    async fn stats(&self) -> Result<StoreStats>;
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    thread_id: String,
    actor_id: String,
    agent_profile: String,
    created_at: i64,
    last_active_at: i64,
    is_active: bool,
    continuation_token: Option<String>,
}

impl From<SessionRow> for Session {
    fn from(r: SessionRow) -> Self {
        Self {
            thread_id: ThreadId::from(r.thread_id),
            actor_id: ActorId::from(r.actor_id),
            agent_profile: r.agent_profile,
            created_at: r.created_at as u64,
            last_active_at: r.last_active_at as u64,
            is_active: r.is_active,
            continuation_token: r.continuation_token,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TurnRow {
    id: i64,
    thread_id: String,
    role: String,
    content: String,
    message_id: Option<String>,
    created_at: i64,
}

impl TryFrom<TurnRow> for ConversationTurn {
    type Error = Error;

    fn try_from(r: TurnRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            thread_id: ThreadId::from(r.thread_id),
            role: TurnRole::from_str(&r.role)?,
            content: r.content,
            message_id: r.message_id.map(MessageId::from),
            created_at: r.created_at as u64,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ToolRow {
    id: i64,
    thread_id: String,
    tool_name: String,
    params: Option<String>,
    result: Option<String>,
    created_at: i64,
}

impl From<ToolRow> for ToolInvocationRecord {
    fn from(r: ToolRow) -> Self {
        Self {
            id: r.id,
            thread_id: ThreadId::from(r.thread_id),
            tool_name: r.tool_name,
            params: r.params,
            result: r.result,
            created_at: r.created_at as u64,
        }
    }
}

const SESSION_COLUMNS: &str = "thread_id, actor_id, agent_profile, created_at, last_active_at, \
                               is_active, continuation_token";

fn limit_clause(limit: Option<u32>) -> i64 {
    limit.map_or(-1, i64::from)
}

/// SQLite-backed [`SessionStore`].
#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    /// Wrap an existing pool. Migrations must already have been run.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `path` and run migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::message(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        crate::run_migrations(&pool).await?;
        debug!(path = %path.display(), "opened session database");
        Ok(Self { pool })
    }

    /// A private in-memory database. A single connection keeps every caller
    /// on the same database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        crate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get(&self, thread_id: &ThreadId) -> Result<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM threads WHERE thread_id = ?"
        ))
        .bind(thread_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn create(
        &self,
        thread_id: &ThreadId,
        actor_id: &ActorId,
        agent_profile: &str,
    ) -> Result<Session> {
        let now = now_ms() as i64;
        let inserted = sqlx::query(
            r#"INSERT OR IGNORE INTO threads
               (thread_id, actor_id, agent_profile, created_at, last_active_at, is_active)
               VALUES (?, ?, ?, ?, ?, 1)"#,
        )
        .bind(thread_id.as_str())
        .bind(actor_id.as_str())
        .bind(agent_profile)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(Error::already_exists(thread_id));
        }

        #[cfg(feature = "metrics")]
        counter!(session_metrics::CREATED_TOTAL, labels::PROFILE => agent_profile.to_string())
            .increment(1);

        debug!(thread_id = %thread_id, actor_id = %actor_id, profile = agent_profile, "session created");

        Ok(Session {
            thread_id: thread_id.clone(),
            actor_id: actor_id.clone(),
            agent_profile: agent_profile.to_string(),
            created_at: now as u64,
            last_active_at: now as u64,
            is_active: true,
            continuation_token: None,
        })
    }

    async fn update_continuation_token(&self, thread_id: &ThreadId, token: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE threads SET continuation_token = ?, last_active_at = ? WHERE thread_id = ?",
        )
        .bind(token)
        .bind(now_ms() as i64)
        .bind(thread_id.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(thread_id));
        }
        Ok(())
    }

    async fn append_turn(
        &self,
        thread_id: &ThreadId,
        role: TurnRole,
        content: &str,
        message_id: Option<&MessageId>,
    ) -> Result<i64> {
        let now = now_ms() as i64;
        let mut tx = self.pool.begin().await?;

        let touched = sqlx::query("UPDATE threads SET last_active_at = ? WHERE thread_id = ?")
            .bind(now)
            .bind(thread_id.as_str())
            .execute(&mut *tx)
            .await?;
        if touched.rows_affected() == 0 {
            return Err(Error::not_found(thread_id));
        }

        let id = sqlx::query(
            r#"INSERT INTO conversation_turns (thread_id, role, content, message_id, created_at)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(thread_id.as_str())
        .bind(role.as_str())
        .bind(content)
        .bind(message_id.map(MessageId::as_str))
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        tx.commit().await?;

        #[cfg(feature = "metrics")]
        counter!(session_metrics::TURNS_TOTAL, labels::ROLE => role.as_str()).increment(1);

        Ok(id)
    }

    async fn append_tool_record(
        &self,
        thread_id: &ThreadId,
        tool_name: &str,
        params: Option<&str>,
        result: Option<&str>,
    ) -> Result<i64> {
        let id = sqlx::query(
            r#"INSERT INTO tool_invocations (thread_id, tool_name, params, result, created_at)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(thread_id.as_str())
        .bind(tool_name)
        .bind(params)
        .bind(result)
        .bind(now_ms() as i64)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    async fn set_inactive(&self, thread_id: &ThreadId) -> Result<bool> {
        let result = sqlx::query("UPDATE threads SET is_active = 0 WHERE thread_id = ?")
            .bind(thread_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch(&self, thread_id: &ThreadId) -> Result<()> {
        sqlx::query("UPDATE threads SET last_active_at = ? WHERE thread_id = ?")
            .bind(now_ms() as i64)
            .bind(thread_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn turns(
        &self,
        thread_id: &ThreadId,
        limit: Option<u32>,
    ) -> Result<Vec<ConversationTurn>> {
        let rows = sqlx::query_as::<_, TurnRow>(
            "SELECT id, thread_id, role, content, message_id, created_at \
             FROM conversation_turns WHERE thread_id = ? ORDER BY id ASC LIMIT ?",
        )
        .bind(thread_id.as_str())
        .bind(limit_clause(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn recent_turns(
        &self,
        thread_id: &ThreadId,
        count: u32,
    ) -> Result<Vec<ConversationTurn>> {
        let rows = sqlx::query_as::<_, TurnRow>(
            "SELECT id, thread_id, role, content, message_id, created_at \
             FROM conversation_turns WHERE thread_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(thread_id.as_str())
        .bind(i64::from(count))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn tool_records(
        &self,
        thread_id: &ThreadId,
        limit: Option<u32>,
    ) -> Result<Vec<ToolInvocationRecord>> {
        let rows = sqlx::query_as::<_, ToolRow>(
            "SELECT id, thread_id, tool_name, params, result, created_at \
             FROM tool_invocations WHERE thread_id = ? ORDER BY id ASC LIMIT ?",
        )
        .bind(thread_id.as_str())
        .bind(limit_clause(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_for_actor(&self, actor_id: &ActorId, active_only: bool) -> Result<Vec<Session>> {
        let filter = if active_only {
            " AND is_active = 1"
        } else {
            ""
        };
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM threads WHERE actor_id = ?{filter} \
             ORDER BY last_active_at DESC, rowid DESC"
        ))
        .bind(actor_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let (total_sessions, active_sessions): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(is_active), 0) FROM threads",
        )
        .fetch_one(&self.pool)
        .await?;
        let total_turns: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversation_turns")
            .fetch_one(&self.pool)
            .await?;
        let total_tool_invocations: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM tool_invocations")
                .fetch_one(&self.pool)
                .await?;
        Ok(StoreStats {
            total_sessions: total_sessions as u64,
            active_sessions: active_sessions as u64,
            total_turns: total_turns as u64,
            total_tool_invocations: total_tool_invocations as u64,
        })
    }
}
