//! Per-thread message ordering and sequential agent execution.
//!
//! Messages are queued per thread and drained by at most one worker per
//! thread, so an agent always sees a thread's messages in arrival order and
//! never runs twice concurrently for the same thread. Different threads are
//! drained in parallel.

pub mod error;
pub mod processor;
pub mod queue;
pub mod rate_limit;
mod tasks;

pub use {
    error::{ChatError, Result},
    processor::{Collaborators, IncomingMessage, ProcessorConfig, ThreadProcessor, ThreadState},
    queue::{QueueStats, QueuedMessage, ThreadMessageQueue},
    rate_limit::{AdmissionDecision, AdmissionWindow, RateLimiter},
};
