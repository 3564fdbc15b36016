use std::{fmt, str::FromStr};

use {
    parley_common::{ActorId, MessageId, ThreadId},
    serde::{Deserialize, Serialize},
};

use crate::error::Error;

/// Binding between a chat thread and an agent conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub thread_id: ThreadId,
    pub actor_id: ActorId,
    pub agent_profile: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
    pub last_active_at: u64,
    pub is_active: bool,
    /// Opaque token handed back by the agent so the next invocation resumes
    /// the same conversation.
    pub continuation_token: Option<String>,
}

impl Session {
    /// Whether the next invocation continues an earlier conversation.
    #[must_use]
    pub fn is_continuation(&self) -> bool {
        self.continuation_token.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TurnRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(Error::message(format!("unknown turn role: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: i64,
    pub thread_id: ThreadId,
    pub role: TurnRole,
    pub content: String,
    pub message_id: Option<MessageId>,
    pub created_at: u64,
}

/// One tool call made by the agent while handling a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocationRecord {
    pub id: i64,
    pub thread_id: ThreadId,
    pub tool_name: String,
    /// JSON-encoded parameters.
    pub params: Option<String>,
    pub result: Option<String>,
    pub created_at: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_sessions: u64,
    pub active_sessions: u64,
    pub total_turns: u64,
    pub total_tool_invocations: u64,
}
