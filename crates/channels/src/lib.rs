//! Chat-platform seams.
//!
//! A channel delivers [`ChatEvent`]s, re-resolves messages on demand through a
//! [`MessageResolver`] and accepts replies through [`ChannelOutbound`].

pub mod chunk;
pub mod error;
pub mod plugin;

pub use {
    chunk::{DEFAULT_CONTINUATION_PREFIX, DEFAULT_MAX_MESSAGE_LEN, chunk_reply},
    error::{Error, Result},
    plugin::{AttachmentRef, ChannelOutbound, ChatEvent, MessageResolver, ResolvedMessage},
};
