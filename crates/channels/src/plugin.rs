use {
    async_trait::async_trait,
    parley_common::{ActorId, MessageId, ThreadId},
    serde::{Deserialize, Serialize},
};

use crate::{chunk::chunk_reply, error::Result};

// ── Inbound ─────────────────────────────────────────────────────────────────

/// A file attached to a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub filename: String,
    pub url: String,
    /// Size declared by the platform, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Events delivered by a chat channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    MessageCreated {
        thread_id: ThreadId,
        message_id: MessageId,
        actor_id: ActorId,
        #[serde(default)]
        text: String,
        #[serde(default)]
        attachments: Vec<AttachmentRef>,
    },
    MessageDeleted {
        thread_id: ThreadId,
        message_id: MessageId,
    },
    /// A user asked for a new agent thread.
    ThreadStarted {
        thread_id: ThreadId,
        actor_id: ActorId,
        #[serde(default)]
        profile: Option<String>,
        /// The message that opened the thread, submitted as the first prompt.
        #[serde(default)]
        message_id: Option<MessageId>,
        #[serde(default)]
        text: Option<String>,
    },
}

impl ChatEvent {
    pub fn thread_id(&self) -> &ThreadId {
        match self {
            Self::MessageCreated { thread_id, .. }
            | Self::MessageDeleted { thread_id, .. }
            | Self::ThreadStarted { thread_id, .. } => thread_id,
        }
    }
}

/// Current state of a chat message, as seen when it is about to be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedMessage {
    pub message_id: MessageId,
    pub actor_id: ActorId,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
}

impl ResolvedMessage {
    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }
}

/// Fetches a message again right before it is processed. Edits made while
/// the message sat in the queue are therefore picked up.
#[async_trait]
pub trait MessageResolver: Send + Sync {
    /// `Ok(None)` means the message no longer exists.
    async fn resolve(
        &self,
        thread_id: &ThreadId,
        message_id: &MessageId,
    ) -> Result<Option<ResolvedMessage>>;
}

// ── Outbound ────────────────────────────────────────────────────────────────

/// Send messages to a thread.
#[async_trait]
pub trait ChannelOutbound: Send + Sync {
    async fn send_text(&self, thread_id: &ThreadId, text: &str) -> Result<()>;

    /// Show a typing indicator. Channels without one ignore it.
    async fn send_typing(&self, _thread_id: &ThreadId) -> Result<()> {
        Ok(())
    }

    /// Send a reply that may exceed the platform limit, split into chunks.
    async fn send_reply(
        &self,
        thread_id: &ThreadId,
        text: &str,
        max_len: usize,
        continuation_prefix: &str,
    ) -> Result<()> {
        for chunk in chunk_reply(text, max_len, continuation_prefix) {
            self.send_text(thread_id, &chunk).await?;
        }
        Ok(())
    }
}
