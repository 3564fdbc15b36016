//! Metric name and label definitions.
//!
//! Centralizing names keeps dashboards and code in agreement.

/// Admission control
pub mod admission {
    /// Messages allowed through the rate limiter
    pub const ALLOWED_TOTAL: &str = "parley_admission_allowed_total";
    /// Messages rejected by the rate limiter
    pub const DENIED_TOTAL: &str = "parley_admission_denied_total";
}

/// Per-thread message queue
pub mod queue {
    /// Messages appended to a thread queue
    pub const ENQUEUED_TOTAL: &str = "parley_queue_enqueued_total";
    /// Messages tombstoned before they were dequeued
    pub const RETRACTED_TOTAL: &str = "parley_queue_retracted_total";
    /// Tombstoned entries discarded while dequeuing
    pub const SKIPPED_TOTAL: &str = "parley_queue_skipped_total";
    /// Drain workers currently holding a thread lock
    pub const ACTIVE_DRAINS: &str = "parley_queue_active_drains";
}

/// Agent invocations
pub mod agent {
    pub const INVOCATIONS_TOTAL: &str = "parley_agent_invocations_total";
    pub const INVOCATION_ERRORS_TOTAL: &str = "parley_agent_invocation_errors_total";
    pub const INVOCATION_DURATION_SECONDS: &str = "parley_agent_invocation_duration_seconds";
    pub const TOOL_USES_TOTAL: &str = "parley_agent_tool_uses_total";
}

/// Session store
pub mod session {
    pub const CREATED_TOTAL: &str = "parley_sessions_created_total";
    pub const TURNS_TOTAL: &str = "parley_session_turns_total";
}

/// Attachments
pub mod attachments {
    pub const DOWNLOADED_TOTAL: &str = "parley_attachments_downloaded_total";
    pub const FAILED_TOTAL: &str = "parley_attachments_failed_total";
    pub const BYTES_TOTAL: &str = "parley_attachments_bytes_total";
}

/// Common label keys
pub mod labels {
    pub const ERROR_TYPE: &str = "error_type";
    pub const ROLE: &str = "role";
    pub const PROFILE: &str = "profile";
    pub const WINDOW: &str = "window";
    pub const TOOL: &str = "tool";
}
