//! Config schema types (admission limits, agent CLI, output, storage, profiles).
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub rate_limit: RateLimitConfig,
    pub agent: AgentCliConfig,
    pub output: OutputConfig,
    pub attachments: AttachmentsConfig,
    pub storage: StorageConfig,
    pub profiles: ProfilesConfig,
}

/// Per-actor sliding-window admission limits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Messages admitted per actor in any trailing 60 seconds.
    pub per_minute: u32,
    /// Messages admitted per actor in any trailing hour.
    pub per_hour: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: 10,
            per_hour: 100,
        }
    }
}

/// How the external agent CLI is launched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentCliConfig {
    /// Explicit CLI path. When unset the binary is located via
    /// `PARLEY_AGENT_CLI`, `$PATH`, then well-known install locations.
    pub cli_path: Option<PathBuf>,
    /// Agent turns allowed per invocation before it is treated as timed out.
    pub max_turns: u32,
    /// Wall-clock budget per invocation.
    pub timeout_secs: u64,
    pub permission_mode: String,
    /// Tools the agent may use; empty means the CLI default.
    pub allowed_tools: Vec<String>,
    /// Extra arguments appended verbatim.
    pub extra_args: Vec<String>,
}

impl Default for AgentCliConfig {
    fn default() -> Self {
        Self {
            cli_path: None,
            max_turns: 20,
            timeout_secs: 600,
            permission_mode: "acceptEdits".into(),
            allowed_tools: [
                "Read",
                "Write",
                "Edit",
                "Bash",
                "Glob",
                "Grep",
                "WebSearch",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            extra_args: Vec::new(),
        }
    }
}

/// Output sink behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Hard limit imposed by the chat platform, minus some headroom.
    pub max_message_len: usize,
    /// Prepended to every chunk after the first.
    pub continuation_prefix: String,
    /// Post tool-use notices while the agent runs.
    pub show_tool_activity: bool,
    /// Post intermediate assistant text while the agent runs.
    pub show_thinking: bool,
    /// Truncation length for thinking / tool previews.
    pub preview_chars: usize,
    /// Post a greeting when a new thread is started.
    pub greet_new_threads: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            max_message_len: 1950,
            continuation_prefix: "(continued)\n".into(),
            show_tool_activity: true,
            show_thinking: true,
            preview_chars: 300,
            greet_new_threads: true,
        }
    }
}

/// Attachment download limits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentsConfig {
    pub max_file_size: u64,
    pub timeout_secs: u64,
}

impl Default for AttachmentsConfig {
    fn default() -> Self {
        Self {
            max_file_size: 1024 * 1024,
            timeout_secs: 30,
        }
    }
}

/// Session database location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file. Defaults to `<data_dir>/sessions.db`.
    pub database_path: Option<PathBuf>,
}

/// Agent profile discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilesConfig {
    /// Directory holding one sub-directory per profile.
    pub dir: PathBuf,
    /// Profile used when a new thread does not name one.
    pub default: Option<String>,
    /// Prompt prepended to every profile's own system prompt.
    pub base_system_prompt: Option<String>,
}

impl Default for ProfilesConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("agents"),
            default: None,
            base_system_prompt: None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: ParleyConfig = toml::from_str(
            r#"
            [rate_limit]
            per_minute = 3

            [output]
            show_thinking = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.rate_limit.per_minute, 3);
        assert_eq!(cfg.rate_limit.per_hour, 100);
        assert!(!cfg.output.show_thinking);
        assert_eq!(cfg.output.max_message_len, 1950);
        assert_eq!(cfg.agent.max_turns, 20);
    }
}
