use std::{
    path::PathBuf,
    pin::Pin,
    task::{Context, Poll},
};

use {
    async_trait::async_trait,
    futures::{Stream, StreamExt},
    serde_json::Value,
};

use crate::{
    error::{Error, Result},
    event::AgentEvent,
};

/// One call into the agent.
#[derive(Debug, Clone, Default)]
pub struct InvokeRequest {
    pub prompt: String,
    /// Working directory for the agent.
    pub workspace: PathBuf,
    pub system_prompt: Option<String>,
    /// Resume the conversation identified by this token.
    pub continuation_token: Option<String>,
    /// Per-profile tool list; `None` uses the invoker's configured list.
    pub allowed_tools: Option<Vec<String>>,
}

impl InvokeRequest {
    pub fn new(prompt: impl Into<String>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            workspace: workspace.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    #[must_use]
    pub fn with_continuation(mut self, token: Option<String>) -> Self {
        self.continuation_token = token;
        self
    }

    #[must_use]
    pub fn with_allowed_tools(mut self, tools: Option<Vec<String>>) -> Self {
        self.allowed_tools = tools;
        self
    }
}

/// Seam between thread processing and whatever runs the agent.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Start an invocation. Errors here mean nothing was started.
    async fn invoke(&self, request: InvokeRequest) -> Result<AgentRun>;
}

/// A running invocation: a finite stream of events, consumed once.
///
/// Dropping the run cancels the invocation.
pub struct AgentRun {
    inner: Pin<Box<dyn Stream<Item = Result<AgentEvent>> + Send>>,
}

impl AgentRun {
    pub fn new(stream: impl Stream<Item = Result<AgentEvent>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// A run that replays a fixed script.
    pub fn from_events(events: Vec<Result<AgentEvent>>) -> Self {
        Self::new(futures::stream::iter(events))
    }

    /// Drive the run to completion, handing every non-final event to
    /// `on_event`.
    pub async fn collect_outcome(
        mut self,
        mut on_event: impl FnMut(&AgentEvent) + Send,
    ) -> Result<AgentOutcome> {
        let mut collector = OutcomeCollector::default();
        while let Some(item) = self.inner.next().await {
            let event = item?;
            if !event.is_final() {
                on_event(&event);
            }
            collector.observe(event);
        }
        collector.finish()
    }
}

impl Stream for AgentRun {
    type Item = Result<AgentEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for AgentRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRun").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub params: Value,
}

/// What a completed invocation produced.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOutcome {
    pub result_text: String,
    pub continuation_token: Option<String>,
    pub tool_uses: Vec<ToolCall>,
}

/// Folds events into an [`AgentOutcome`] for callers that drive the stream
/// themselves.
#[derive(Debug, Default)]
pub struct OutcomeCollector {
    tool_uses: Vec<ToolCall>,
    final_event: Option<(String, Option<String>)>,
    last_error: Option<String>,
}

impl OutcomeCollector {
    pub fn observe(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::ToolUse { name, params } => self.tool_uses.push(ToolCall { name, params }),
            AgentEvent::Error { message } => self.last_error = Some(message),
            AgentEvent::Final {
                result,
                continuation_token,
            } => self.final_event = Some((result, continuation_token)),
            AgentEvent::Thinking { .. } | AgentEvent::ToolResult { .. } => {},
        }
    }

    /// Fails with [`Error::Transport`] if no final event was seen.
    pub fn finish(self) -> Result<AgentOutcome> {
        match self.final_event {
            Some((result_text, continuation_token)) => Ok(AgentOutcome {
                result_text,
                continuation_token,
                tool_uses: self.tool_uses,
            }),
            None => Err(Error::transport(self.last_error.unwrap_or_else(|| {
                "agent finished without a result".to_string()
            }))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, serde_json::json};

    #[tokio::test]
    async fn collect_outcome_reports_intermediate_events() {
        let run = AgentRun::from_events(vec![
            Ok(AgentEvent::Thinking {
                text: "hmm".into(),
            }),
            Ok(AgentEvent::ToolUse {
                name: "Read".into(),
                params: json!({"path": "a.txt"}),
            }),
            Ok(AgentEvent::Final {
                result: "answer".into(),
                continuation_token: Some("tok".into()),
            }),
        ]);

        let mut seen = Vec::new();
        let outcome = run
            .collect_outcome(|e| seen.push(e.clone()))
            .await
            .unwrap();

        assert_eq!(seen.len(), 2);
        assert_eq!(outcome.result_text, "answer");
        assert_eq!(outcome.continuation_token.as_deref(), Some("tok"));
        assert_eq!(outcome.tool_uses, vec![ToolCall {
            name: "Read".into(),
            params: json!({"path": "a.txt"}),
        }]);
    }

    #[tokio::test]
    async fn missing_final_is_transport_error() {
        let run = AgentRun::from_events(vec![Ok(AgentEvent::Error {
            message: "crashed".into(),
        })]);
        let err = run.collect_outcome(|_| {}).await.unwrap_err();
        assert!(matches!(err, Error::Transport { ref message } if message == "crashed"));
    }

    #[tokio::test]
    async fn stream_error_short_circuits() {
        let run = AgentRun::from_events(vec![
            Err(Error::timeout("too slow")),
            Ok(AgentEvent::Final {
                result: "late".into(),
                continuation_token: None,
            }),
        ]);
        let err = run.collect_outcome(|_| {}).await.unwrap_err();
        assert!(err.is_timeout());
    }
}
