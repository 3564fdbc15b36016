//! Shared identifier types, error definitions, and helpers used across all
//! parley crates.

pub mod error;
pub mod types;

pub use {
    error::{Error, FromMessage, ParleyError, Result},
    types::{ActorId, MessageId, ThreadId, now_ms},
};
