//! Agent events and the decoder for the CLI's `stream-json` output.
//!
//! Each stdout line is one JSON object tagged by `type`. Lines are decoded
//! once here; nothing downstream sees raw JSON.

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tracing::debug,
};

use crate::error::{Error, Result};

/// Everything an invocation can report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Intermediate assistant text.
    Thinking { text: String },
    ToolUse { name: String, params: Value },
    ToolResult { content: String, is_error: bool },
    Error { message: String },
    /// Terminal success. At most one per invocation.
    Final {
        result: String,
        continuation_token: Option<String>,
    },
}

impl AgentEvent {
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final { .. })
    }
}

/// Result of decoding one stdout line.
#[derive(Debug, Default)]
pub struct DecodedLine {
    pub events: Vec<AgentEvent>,
    /// The line was an assistant message and counts against the turn budget.
    pub is_turn: bool,
    /// The agent reported a terminal failure.
    pub failure: Option<Error>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamLine {
    Assistant {
        message: MessageBody,
    },
    User {
        message: MessageBody,
    },
    Result {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    System {
        #[serde(default)]
        subtype: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    #[serde(default)]
    content: MessageContent,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Blocks(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: Option<bool>,
    },
    #[serde(other)]
    Other,
}

/// Flatten a tool result payload, which is either a string or a list of
/// `{"type": "text", "text": ...}` parts.
fn flatten_content(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

fn block_events(content: MessageContent) -> Vec<AgentEvent> {
    let blocks = match content {
        MessageContent::Text(text) if text.trim().is_empty() => return Vec::new(),
        MessageContent::Text(text) => return vec![AgentEvent::Thinking { text }],
        MessageContent::Blocks(blocks) => blocks,
    };

    blocks
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } if text.trim().is_empty() => None,
            ContentBlock::Text { text } => Some(AgentEvent::Thinking { text }),
            ContentBlock::ToolUse { name, input } => Some(AgentEvent::ToolUse {
                name,
                params: input,
            }),
            ContentBlock::ToolResult { content, is_error } => Some(AgentEvent::ToolResult {
                content: flatten_content(content),
                is_error: is_error.unwrap_or(false),
            }),
            ContentBlock::Other => None,
        })
        .collect()
}

/// Decode one line of `stream-json` output.
pub fn decode_line(line: &str) -> Result<DecodedLine> {
    let parsed: StreamLine = serde_json::from_str(line)?;

    let decoded = match parsed {
        StreamLine::Assistant { message } => DecodedLine {
            events: block_events(message.content),
            is_turn: true,
            failure: None,
        },
        StreamLine::User { message } => DecodedLine {
            // User lines echo tool results; plain user text is our own prompt.
            events: block_events(message.content)
                .into_iter()
                .filter(|e| matches!(e, AgentEvent::ToolResult { .. }))
                .collect(),
            ..Default::default()
        },
        StreamLine::Result {
            subtype,
            is_error,
            result,
            session_id,
        } => {
            let subtype = subtype.unwrap_or_else(|| "success".into());
            if !is_error && subtype == "success" {
                DecodedLine {
                    events: vec![AgentEvent::Final {
                        result: result.unwrap_or_default(),
                        continuation_token: session_id.filter(|s| !s.is_empty()),
                    }],
                    ..Default::default()
                }
            } else {
                let message = result
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| format!("agent reported {subtype}"));
                let failure = if subtype == "error_max_turns" {
                    Error::timeout(format!("turn budget exhausted: {message}"))
                } else {
                    Error::transport(message.clone())
                };
                DecodedLine {
                    events: vec![AgentEvent::Error { message }],
                    is_turn: false,
                    failure: Some(failure),
                }
            }
        },
        StreamLine::System { subtype } => {
            debug!(subtype = subtype.as_deref().unwrap_or(""), "skipping system line");
            DecodedLine::default()
        },
        StreamLine::Unknown => {
            debug!("skipping unknown stream line");
            DecodedLine::default()
        },
    };

    Ok(decoded)
}
