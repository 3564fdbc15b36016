//! Per-thread orchestration: enqueue, drain one message at a time, invoke the
//! agent and record the conversation.

use std::{sync::Arc, time::Instant};

use {
    dashmap::DashMap,
    futures::StreamExt,
    parley_agents::{AgentEvent, AgentInvoker, AgentOutcome, InvokeRequest, OutcomeCollector},
    parley_channels::{ChannelOutbound, ChatEvent, MessageResolver},
    parley_common::{ActorId, MessageId, ThreadId},
    parley_config::{OutputConfig, ProfileRegistry},
    parley_media::{AttachmentFetcher, summarize},
    parley_sessions::{Session, SessionStore, TurnRole},
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use parley_metrics::{
    agent as agent_metrics, counter, gauge, histogram, labels, queue as queue_metrics,
};

use crate::{
    error::{ChatError, Result},
    queue::{QueuedMessage, ThreadMessageQueue},
    rate_limit::{AdmissionDecision, RateLimiter},
    tasks::DrainTasks,
};

const NO_RESPONSE: &str = "(no response)";

/// Output behaviour of the processor.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub max_message_len: usize,
    pub continuation_prefix: String,
    pub show_tool_activity: bool,
    pub show_thinking: bool,
    pub preview_chars: usize,
    pub greet_new_threads: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self::from(&OutputConfig::default())
    }
}

impl From<&OutputConfig> for ProcessorConfig {
    fn from(output: &OutputConfig) -> Self {
        Self {
            max_message_len: output.max_message_len,
            continuation_prefix: output.continuation_prefix.clone(),
            show_tool_activity: output.show_tool_activity,
            show_thinking: output.show_thinking,
            preview_chars: output.preview_chars,
            greet_new_threads: output.greet_new_threads,
        }
    }
}

/// Where a thread is in its lifecycle. `Running` and `Draining` are only
/// reported while a worker holds the thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ThreadState {
    #[default]
    Idle,
    /// Session being created.
    Starting,
    /// Agent invocation in flight.
    Running,
    /// Worker holds the thread but is between messages.
    Draining,
}

/// An inbound chat message, as handed to [`ThreadProcessor::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub thread_id: ThreadId,
    pub message_id: MessageId,
    pub actor_id: ActorId,
    pub content: String,
    pub has_attachments: bool,
}

/// External services the processor depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn SessionStore>,
    pub invoker: Arc<dyn AgentInvoker>,
    pub outbound: Arc<dyn ChannelOutbound>,
    pub resolver: Arc<dyn MessageResolver>,
    pub profiles: Arc<ProfileRegistry>,
    pub fetcher: Option<Arc<dyn AttachmentFetcher>>,
}

struct Inner {
    queue: ThreadMessageQueue,
    limiter: RateLimiter,
    deps: Collaborators,
    config: ProcessorConfig,
    states: DashMap<ThreadId, ThreadState>,
    tasks: DrainTasks,
}

/// Serializes work per thread while letting threads run independently.
#[derive(Clone)]
pub struct ThreadProcessor {
    inner: Arc<Inner>,
}

/// Marks a thread busy for as long as it lives. Dropping it clears the flag on
/// every exit path, panics and cancellation included.
struct BusyGuard<'a> {
    inner: &'a Inner,
    thread_id: &'a ThreadId,
}

impl<'a> BusyGuard<'a> {
    fn new(inner: &'a Inner, thread_id: &'a ThreadId) -> Self {
        inner.queue.set_busy(thread_id, true);
        inner.set_state(thread_id, ThreadState::Draining);
        #[cfg(feature = "metrics")]
        gauge!(queue_metrics::ACTIVE_DRAINS).increment(1.0);
        Self { inner, thread_id }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.inner.queue.set_busy(self.thread_id, false);
        self.inner
            .states
            .remove_if(self.thread_id, |_, s| {
                matches!(s, ThreadState::Running | ThreadState::Draining)
            });
        #[cfg(feature = "metrics")]
        gauge!(queue_metrics::ACTIVE_DRAINS).decrement(1.0);
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

impl ThreadProcessor {
    pub fn new(deps: Collaborators, limiter: RateLimiter, config: ProcessorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: ThreadMessageQueue::new(),
                limiter,
                deps,
                config,
                states: DashMap::new(),
                tasks: DrainTasks::default(),
            }),
        }
    }

    pub fn queue(&self) -> &ThreadMessageQueue {
        &self.inner.queue
    }

    pub fn state(&self, thread_id: &ThreadId) -> ThreadState {
        self.inner
            .states
            .get(thread_id)
            .map_or(ThreadState::Idle, |s| *s)
    }

    /// Rate-limit check for one message from `actor_id`.
    pub fn admit(&self, actor_id: &ActorId) -> Result<()> {
        self.inner.admit(actor_id)
    }

    /// Dispatch one event from a chat channel.
    pub async fn handle_inbound(&self, event: ChatEvent) -> Result<()> {
        match event {
            ChatEvent::MessageCreated {
                thread_id,
                message_id,
                actor_id,
                text,
                attachments,
            } => {
                self.submit(IncomingMessage {
                    thread_id,
                    message_id,
                    actor_id,
                    content: text,
                    has_attachments: !attachments.is_empty(),
                });
            },
            ChatEvent::MessageDeleted {
                thread_id,
                message_id,
            } => {
                self.retract(&thread_id, &message_id);
            },
            ChatEvent::ThreadStarted {
                thread_id,
                actor_id,
                profile,
                message_id,
                text,
            } => {
                let opening = message_id.zip(text.filter(|t| !t.trim().is_empty()));
                if let Err(e) = self
                    .start_thread(&thread_id, &actor_id, profile.as_deref(), opening)
                    .await
                {
                    self.inner.report(&thread_id, &e).await;
                    return Err(e);
                }
            },
        }
        Ok(())
    }

    /// Create the session for a new thread, greet, and submit the opening
    /// message if there is one.
    pub async fn start_thread(
        &self,
        thread_id: &ThreadId,
        actor_id: &ActorId,
        profile: Option<&str>,
        opening: Option<(MessageId, String)>,
    ) -> Result<Session> {
        let inner = &self.inner;
        let profiles = &inner.deps.profiles;
        let name = profile
            .or_else(|| profiles.default_name())
            .ok_or_else(|| ChatError::configuration("no agent profiles are configured"))?;
        let profile = profiles.get(name).map_err(ChatError::configuration)?;

        let marked = inner.transition(thread_id, ThreadState::Idle, ThreadState::Starting);
        let created = inner
            .deps
            .store
            .create(thread_id, actor_id, &profile.name)
            .await;
        if marked {
            inner.transition(thread_id, ThreadState::Starting, ThreadState::Idle);
        }
        let session = created?;

        info!(thread_id = %thread_id, actor_id = %actor_id, profile = %profile.name, "thread started");

        if inner.config.greet_new_threads {
            let greeting = format!(
                "Started a conversation with **{}**. Messages in this thread go to the agent.",
                profile.name
            );
            inner.send_notice(thread_id, &greeting).await;
        }

        if let Some((message_id, content)) = opening {
            self.submit(IncomingMessage {
                thread_id: thread_id.clone(),
                message_id,
                actor_id: actor_id.clone(),
                content,
                has_attachments: false,
            });
        }

        Ok(session)
    }

    /// Queue a message and make sure a worker will drain it. Returns the
    /// number of live messages ahead of it.
    pub fn submit(&self, message: IncomingMessage) -> usize {
        let IncomingMessage {
            thread_id,
            message_id,
            actor_id,
            content,
            has_attachments,
        } = message;
        let position = self.inner.queue.enqueue(
            &thread_id,
            message_id,
            actor_id,
            content,
            has_attachments,
        );

        if !self.inner.queue.is_busy(&thread_id) {
            let inner = Arc::clone(&self.inner);
            self.inner.tasks.spawn(async move {
                inner.drain(&thread_id).await;
                thread_id
            });
        }
        position
    }

    /// Withdraw a message that has not been processed yet.
    pub fn retract(&self, thread_id: &ThreadId, message_id: &MessageId) -> bool {
        self.inner.queue.mark_deleted(thread_id, message_id)
    }

    /// Process everything queued for `thread_id`. Normally run by
    /// [`submit`](Self::submit); callable directly.
    pub async fn drain(&self, thread_id: &ThreadId) {
        self.inner.drain(thread_id).await;
    }

    /// Wait for all in-flight drains to finish.
    pub async fn shutdown(&self) {
        info!(in_flight = self.inner.tasks.len(), "waiting for thread workers");
        self.inner.tasks.join_all().await;
    }
}

impl Inner {
    fn set_state(&self, thread_id: &ThreadId, state: ThreadState) {
        self.states.insert(thread_id.clone(), state);
    }

    /// Move to `to` only if the thread is currently in `from`.
    fn transition(&self, thread_id: &ThreadId, from: ThreadState, to: ThreadState) -> bool {
        let mut entry = self.states.entry(thread_id.clone()).or_default();
        if *entry != from {
            return false;
        }
        *entry = to;
        true
    }

    fn admit(&self, actor_id: &ActorId) -> Result<()> {
        match self.limiter.check(actor_id) {
            AdmissionDecision::Allowed => Ok(()),
            AdmissionDecision::Denied {
                retry_after_seconds,
                ..
            } => Err(ChatError::AdmissionDenied {
                retry_after_seconds,
            }),
        }
    }

    async fn drain(&self, thread_id: &ThreadId) {
        loop {
            {
                let lock = self.queue.lock_for(thread_id);
                let _held = lock.lock().await;
                let _busy = BusyGuard::new(self, thread_id);
                debug!(
                    thread_id = %thread_id,
                    pending = self.queue.queue_length(thread_id),
                    "drain started"
                );

                while let Some(message) = self.queue.dequeue_next(thread_id) {
                    let message_id = message.message_id.clone();
                    if let Err(e) = self.process(thread_id, message).await {
                        self.handle_failure(thread_id, &message_id, &e).await;
                        if e.aborts_drain() {
                            warn!(
                                thread_id = %thread_id,
                                remaining = self.queue.queue_length(thread_id),
                                "drain aborted"
                            );
                            return;
                        }
                    }
                    self.set_state(thread_id, ThreadState::Draining);
                }
            }

            // A submit that saw the busy flag just before it was cleared did
            // not spawn a worker; pick its message up here.
            if self.queue.queue_length(thread_id) == 0 || self.queue.is_busy(thread_id) {
                break;
            }
        }
        debug!(thread_id = %thread_id, "drain finished");
    }

    async fn handle_failure(&self, thread_id: &ThreadId, message_id: &MessageId, err: &ChatError) {
        match err {
            ChatError::MessageVanished { .. } => {
                debug!(thread_id = %thread_id, message_id = %message_id, "message vanished, skipping");
            },
            ChatError::AdmissionDenied { .. } | ChatError::SessionNotFound { .. } => {
                info!(
                    thread_id = %thread_id,
                    message_id = %message_id,
                    error = %err,
                    "message not processed"
                );
            },
            _ => {
                error!(
                    thread_id = %thread_id,
                    message_id = %message_id,
                    error_type = err.error_type(),
                    error = %err,
                    "message processing failed"
                );
            },
        }
        if err.is_recorded() {
            self.record_error(thread_id, err).await;
        }
        self.report(thread_id, err).await;
    }

    /// Append an `[error]` turn. A thread without a session has no log to
    /// write to.
    async fn record_error(&self, thread_id: &ThreadId, err: &ChatError) {
        let content = format!("[error] {err}");
        if let Err(e) = self
            .deps
            .store
            .append_turn(thread_id, TurnRole::Assistant, &content, None)
            .await
        {
            warn!(thread_id = %thread_id, error = %e, "failed to record error in session log");
        }
    }

    /// Tell the thread about a failure, if it is one users should see.
    async fn report(&self, thread_id: &ThreadId, err: &ChatError) {
        if err.is_user_visible() {
            self.send_notice(thread_id, &err.user_message()).await;
        }
    }

    /// Best-effort post; delivery failures are logged and swallowed.
    async fn send_notice(&self, thread_id: &ThreadId, text: &str) {
        if let Err(e) = self.deps.outbound.send_text(thread_id, text).await {
            warn!(thread_id = %thread_id, error = %e, "failed to post to thread");
        }
    }

    async fn process(&self, thread_id: &ThreadId, queued: QueuedMessage) -> Result<()> {
        let deps = &self.deps;

        let resolved = deps
            .resolver
            .resolve(thread_id, &queued.message_id)
            .await?
            .ok_or_else(|| ChatError::MessageVanished {
                message_id: queued.message_id.clone(),
            })?;

        self.admit(&resolved.actor_id)?;

        let session = deps
            .store
            .get(thread_id)
            .await?
            .filter(|s| s.is_active)
            .ok_or_else(|| ChatError::SessionNotFound {
                thread_id: thread_id.clone(),
            })?;

        let profile = deps
            .profiles
            .get(&session.agent_profile)
            .map_err(ChatError::configuration)?;

        let mut prompt = resolved.text.clone();
        if resolved.has_attachments() {
            match &deps.fetcher {
                Some(fetcher) => {
                    let outcomes = fetcher.fetch(&resolved.attachments, &profile.workspace).await;
                    if let Some(summary) = summarize(&outcomes) {
                        if !prompt.is_empty() {
                            prompt.push_str("\n\n");
                        }
                        prompt.push_str(&summary);
                    }
                },
                None => warn!(thread_id = %thread_id, "attachments ignored, no fetcher configured"),
            }
        }
        if prompt.trim().is_empty() {
            debug!(thread_id = %thread_id, message_id = %resolved.message_id, "empty message, skipping");
            return Ok(());
        }

        deps.store
            .append_turn(thread_id, TurnRole::User, &prompt, Some(&resolved.message_id))
            .await?;

        let notice = if session.is_continuation() {
            "processing... (continuing conversation)"
        } else {
            "processing... (new conversation)"
        };
        self.send_notice(thread_id, notice).await;
        if let Err(e) = deps.outbound.send_typing(thread_id).await {
            debug!(thread_id = %thread_id, error = %e, "typing indicator failed");
        }

        let request = InvokeRequest::new(prompt, profile.workspace.clone())
            .with_system_prompt(profile.system_prompt.clone())
            .with_continuation(session.continuation_token.clone())
            .with_allowed_tools(profile.allowed_tools.clone());

        self.set_state(thread_id, ThreadState::Running);
        let started = Instant::now();
        let result = self.run_agent(thread_id, request).await;
        let elapsed = started.elapsed();

        #[cfg(feature = "metrics")]
        histogram!(agent_metrics::INVOCATION_DURATION_SECONDS, labels::PROFILE => profile.name.clone())
            .record(elapsed.as_secs_f64());

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                #[cfg(feature = "metrics")]
                counter!(agent_metrics::INVOCATION_ERRORS_TOTAL, labels::ERROR_TYPE => e.error_type())
                    .increment(1);
                return Err(e);
            },
        };

        info!(
            thread_id = %thread_id,
            elapsed_ms = elapsed.as_millis() as u64,
            tool_uses = outcome.tool_uses.len(),
            resumed = session.is_continuation(),
            "agent turn complete"
        );

        if let Some(token) = &outcome.continuation_token {
            deps.store.update_continuation_token(thread_id, token).await?;
        }
        deps.store
            .append_turn(thread_id, TurnRole::Assistant, &outcome.result_text, None)
            .await?;

        let reply = if outcome.result_text.trim().is_empty() {
            NO_RESPONSE
        } else {
            outcome.result_text.as_str()
        };
        deps.outbound
            .send_reply(
                thread_id,
                reply,
                self.config.max_message_len,
                &self.config.continuation_prefix,
            )
            .await?;
        Ok(())
    }

    async fn run_agent(
        &self,
        thread_id: &ThreadId,
        request: InvokeRequest,
    ) -> Result<AgentOutcome> {
        let mut run = self.deps.invoker.invoke(request).await?;
        let mut collector = OutcomeCollector::default();
        while let Some(item) = run.next().await {
            let event = item?;
            self.forward_event(thread_id, &event).await;
            collector.observe(event);
        }
        Ok(collector.finish()?)
    }

    async fn forward_event(&self, thread_id: &ThreadId, event: &AgentEvent) {
        let config = &self.config;
        match event {
            AgentEvent::Thinking { text } => {
                if config.show_thinking {
                    self.send_notice(thread_id, &preview(text, config.preview_chars))
                        .await;
                }
            },
            AgentEvent::ToolUse { name, params } => {
                #[cfg(feature = "metrics")]
                counter!(agent_metrics::TOOL_USES_TOTAL, labels::TOOL => name.clone()).increment(1);

                let params = params.to_string();
                if let Err(e) = self
                    .deps
                    .store
                    .append_tool_record(thread_id, name, Some(&params), None)
                    .await
                {
                    warn!(thread_id = %thread_id, tool = %name, error = %e, "failed to record tool use");
                }
                if config.show_tool_activity {
                    let line = format!("[tool] {name}: {}", preview(&params, config.preview_chars));
                    self.send_notice(thread_id, &line).await;
                }
            },
            AgentEvent::ToolResult { content, is_error } => {
                if config.show_tool_activity {
                    let label = if *is_error {
                        "[tool error]"
                    } else {
                        "[tool result]"
                    };
                    let line = format!("{label} {}", preview(content, config.preview_chars));
                    self.send_notice(thread_id, &line).await;
                }
            },
            AgentEvent::Error { message } => {
                warn!(thread_id = %thread_id, error = %message, "agent reported an error");
            },
            AgentEvent::Final { .. } => {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_on_char_boundary() {
        assert_eq!(preview("  short  ", 10), "short");
        assert_eq!(preview("ééééé", 3), "ééé...");
    }

    #[test]
    fn config_follows_output_settings() {
        let output = OutputConfig {
            show_thinking: false,
            max_message_len: 100,
            ..OutputConfig::default()
        };
        let config = ProcessorConfig::from(&output);
        assert!(!config.show_thinking);
        assert_eq!(config.max_message_len, 100);
        assert_eq!(config.continuation_prefix, "(continued)\n");
    }
}
