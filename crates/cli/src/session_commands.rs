//! `parley sessions`: inspect stored thread sessions.

use std::path::Path;

use {
    anyhow::Context,
    clap::Subcommand,
    parley_common::{ActorId, ThreadId},
    parley_sessions::{SessionStore, SqliteSessionStore},
};

#[derive(Subcommand)]
pub enum SessionAction {
    /// List sessions started by an actor, most recently active first.
    List {
        /// Actor (user) id.
        actor: String,
        /// Include closed sessions.
        #[arg(long)]
        all: bool,
    },
    /// Print a thread's conversation log.
    History {
        thread: String,
        /// Only the most recent N turns.
        #[arg(short, long)]
        limit: Option<u32>,
        /// Also print recorded tool calls.
        #[arg(long)]
        tools: bool,
    },
    /// Close a thread's session. Later messages in the thread are refused.
    Close { thread: String },
}

pub async fn handle_sessions(action: SessionAction, database_path: &Path) -> anyhow::Result<()> {
    if !database_path.exists() {
        println!("No session database at {}.", database_path.display());
        return Ok(());
    }
    let store = SqliteSessionStore::open(database_path)
        .await
        .with_context(|| format!("failed to open {}", database_path.display()))?;

    match action {
        SessionAction::List { actor, all } => {
            let sessions = store.list_for_actor(&ActorId::from(actor), !all).await?;
            if sessions.is_empty() {
                println!("No sessions found.");
            }
            for s in &sessions {
                let state = if s.is_active {
                    "active"
                } else {
                    "closed"
                };
                let resumable = if s.is_continuation() {
                    ", resumable"
                } else {
                    ""
                };
                println!(
                    "  {}  {} [{state}{resumable}] last active {}",
                    s.thread_id,
                    s.agent_profile,
                    format_ms(s.last_active_at)
                );
            }
        },
        SessionAction::History {
            thread,
            limit,
            tools,
        } => {
            let thread = ThreadId::from(thread);
            let Some(session) = store.get(&thread).await? else {
                println!("No session for thread {thread}.");
                return Ok(());
            };
            println!(
                "Thread {} ({}, started by {})",
                session.thread_id, session.agent_profile, session.actor_id
            );
            let turns = match limit {
                Some(n) => store.recent_turns(&thread, n).await?,
                None => store.turns(&thread, None).await?,
            };
            for turn in &turns {
                println!("\n[{}] {}", turn.role, format_ms(turn.created_at));
                println!("{}", turn.content);
            }
            if tools {
                let records = store.tool_records(&thread, limit).await?;
                if !records.is_empty() {
                    println!("\nTool calls:");
                }
                for r in &records {
                    println!("  {} {}", r.tool_name, r.params.as_deref().unwrap_or(""));
                }
            }
        },
        SessionAction::Close { thread } => {
            let thread = ThreadId::from(thread);
            if store.set_inactive(&thread).await? {
                println!("Closed session for thread {thread}.");
            } else {
                println!("No session for thread {thread}.");
            }
        },
    }
    Ok(())
}

/// Seconds-resolution age, e.g. `42s ago`, `3h ago`.
fn format_ms(at_ms: u64) -> String {
    let age = parley_common::now_ms().saturating_sub(at_ms) / 1000;
    match age {
        0..60 => format!("{age}s ago"),
        60..3600 => format!("{}m ago", age / 60),
        3600..86_400 => format!("{}h ago", age / 3600),
        _ => format!("{}d ago", age / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ages_are_human_readable() {
        let now = parley_common::now_ms();
        assert_eq!(format_ms(now), "0s ago");
        assert_eq!(format_ms(now - 5 * 60_000), "5m ago");
        assert_eq!(format_ms(now - 2 * 86_400_000), "2d ago");
        assert_eq!(format_ms(now + 10_000), "0s ago");
    }
}
