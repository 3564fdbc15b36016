//! End-to-end behaviour of the thread processor against in-memory
//! collaborators.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    futures::stream,
    parley_agents::{AgentError, AgentEvent, AgentInvoker, AgentRun, InvokeRequest},
    parley_channels::{ChannelOutbound, ChatEvent, MessageResolver, ResolvedMessage},
    parley_chat::{
        Collaborators, IncomingMessage, ProcessorConfig, RateLimiter, ThreadProcessor, ThreadState,
    },
    parley_common::{ActorId, MessageId, ThreadId},
    parley_config::{AgentProfile, ProfileRegistry, RateLimitConfig},
    parley_sessions::{SessionStore, SqliteSessionStore, TurnRole},
    serde_json::json,
    tokio::sync::{Barrier, Notify},
};

// ── Fakes ───────────────────────────────────────────────────────────────────

/// Runs in flight per thread, counted from `invoke` until the returned
/// stream is dropped.
#[derive(Default)]
struct ActiveRuns {
    per_thread: Mutex<HashMap<String, usize>>,
    max_per_thread: Mutex<usize>,
}

struct ActiveRun {
    runs: Arc<ActiveRuns>,
    thread: String,
}

impl ActiveRun {
    fn enter(runs: &Arc<ActiveRuns>, thread: &str) -> Self {
        let mut active = runs.per_thread.lock().unwrap();
        let count = active.entry(thread.to_string()).or_default();
        *count += 1;
        let mut max = runs.max_per_thread.lock().unwrap();
        *max = (*max).max(*count);
        Self {
            runs: Arc::clone(runs),
            thread: thread.to_string(),
        }
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        *self
            .runs
            .per_thread
            .lock()
            .unwrap()
            .get_mut(&self.thread)
            .unwrap() -= 1;
    }
}

/// Echoes the prompt back. Prompts starting with `timeout` or `fail` produce
/// the matching error; `hold` blocks until [`ScriptedAgent::release`] fires.
/// Prompts are `"<thread>:<n>"` so calls can be grouped.
#[derive(Default)]
struct ScriptedAgent {
    calls: Mutex<Vec<InvokeRequest>>,
    active: Arc<ActiveRuns>,
    held: Notify,
    release: Notify,
}

impl ScriptedAgent {
    fn prompts_for(&self, thread: &str) -> Vec<String> {
        let prefix = format!("{thread}:");
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.prompt.starts_with(&prefix))
            .map(|r| r.prompt.clone())
            .collect()
    }

    fn tokens_seen(&self) -> Vec<Option<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.continuation_token.clone())
            .collect()
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn max_active_per_thread(&self) -> usize {
        *self.active.max_per_thread.lock().unwrap()
    }
}

#[async_trait]
impl AgentInvoker for ScriptedAgent {
    async fn invoke(&self, request: InvokeRequest) -> parley_agents::Result<AgentRun> {
        let thread = request
            .prompt
            .split(':')
            .next()
            .unwrap_or_default()
            .to_string();
        let run = ActiveRun::enter(&self.active, &thread);
        self.calls.lock().unwrap().push(request.clone());

        tokio::time::sleep(Duration::from_millis(3)).await;

        let body = request.prompt.split(':').nth(1).unwrap_or_default();
        if body.starts_with("hold") {
            self.held.notify_one();
            self.release.notified().await;
        }
        let events = if body.starts_with("timeout") {
            vec![
                Ok(AgentEvent::Thinking {
                    text: "working".into(),
                }),
                Err(AgentError::timeout("exceeded 1s")),
            ]
        } else if body.starts_with("fail") {
            vec![Ok(AgentEvent::Error {
                message: "process exited with status 1".into(),
            })]
        } else {
            vec![
                Ok(AgentEvent::ToolUse {
                    name: "Read".into(),
                    params: json!({"file_path": "notes.md"}),
                }),
                Ok(AgentEvent::Final {
                    result: format!("echo {}", request.prompt),
                    continuation_token: Some(format!("tok-{}", request.prompt)),
                }),
            ]
        };
        // The guard travels with the stream so the count covers event
        // consumption and whatever the processor does before dropping it.
        let events = stream::unfold((events.into_iter(), run), |(mut events, run)| async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            events.next().map(|event| (event, (events, run)))
        });
        Ok(AgentRun::new(events))
    }
}

#[derive(Default)]
struct RecordingOutbound {
    sent: Mutex<Vec<(ThreadId, String)>>,
}

impl RecordingOutbound {
    fn texts(&self, thread: &ThreadId) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == thread)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl ChannelOutbound for RecordingOutbound {
    async fn send_text(&self, thread_id: &ThreadId, text: &str) -> parley_channels::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((thread_id.clone(), text.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct MapResolver {
    messages: Mutex<HashMap<(ThreadId, MessageId), ResolvedMessage>>,
}

impl MapResolver {
    fn post(&self, thread: &ThreadId, id: u64, actor: &str, text: &str) {
        let message_id = MessageId::from(id);
        self.messages
            .lock()
            .unwrap()
            .insert((thread.clone(), message_id.clone()), ResolvedMessage {
                message_id,
                actor_id: ActorId::from(actor),
                text: text.to_string(),
                attachments: Vec::new(),
            });
    }
}

#[async_trait]
impl MessageResolver for MapResolver {
    async fn resolve(
        &self,
        thread_id: &ThreadId,
        message_id: &MessageId,
    ) -> parley_channels::Result<Option<ResolvedMessage>> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .get(&(thread_id.clone(), message_id.clone()))
            .cloned())
    }
}

// ── Harness ─────────────────────────────────────────────────────────────────

struct Harness {
    processor: ThreadProcessor,
    agent: Arc<ScriptedAgent>,
    outbound: Arc<RecordingOutbound>,
    resolver: Arc<MapResolver>,
    store: Arc<SqliteSessionStore>,
    _workspace: tempfile::TempDir,
}

async fn harness(limits: RateLimitConfig) -> Harness {
    let workspace = tempfile::tempdir().unwrap();
    let profile = AgentProfile {
        name: "helper".into(),
        description: None,
        system_prompt: "Be brief.".into(),
        allowed_tools: None,
        workspace: workspace.path().to_path_buf(),
        root: workspace.path().to_path_buf(),
    };
    let agent = Arc::new(ScriptedAgent::default());
    let outbound = Arc::new(RecordingOutbound::default());
    let resolver = Arc::new(MapResolver::default());
    let store = Arc::new(SqliteSessionStore::in_memory().await.unwrap());

    let deps = Collaborators {
        store: store.clone(),
        invoker: agent.clone(),
        outbound: outbound.clone(),
        resolver: resolver.clone(),
        profiles: Arc::new(ProfileRegistry::from_profiles([profile], None)),
        fetcher: None,
    };
    let config = ProcessorConfig {
        greet_new_threads: false,
        show_thinking: false,
        ..ProcessorConfig::default()
    };
    Harness {
        processor: ThreadProcessor::new(deps, RateLimiter::new(limits), config),
        agent,
        outbound,
        resolver,
        store,
        _workspace: workspace,
    }
}

fn generous() -> RateLimitConfig {
    RateLimitConfig {
        per_minute: 1000,
        per_hour: 10_000,
    }
}

impl Harness {
    async fn start(&self, thread: &ThreadId, actor: &str) {
        self.processor
            .start_thread(thread, &ActorId::from(actor), None, None)
            .await
            .unwrap();
    }

    fn post_and_submit(&self, thread: &ThreadId, id: u64, actor: &str, text: &str) -> usize {
        self.resolver.post(thread, id, actor, text);
        self.processor.submit(IncomingMessage {
            thread_id: thread.clone(),
            message_id: MessageId::from(id),
            actor_id: ActorId::from(actor),
            content: text.to_string(),
            has_attachments: false,
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn messages_are_processed_in_order_one_at_a_time_per_thread() {
    let h = harness(generous()).await;
    let threads: Vec<ThreadId> = (0..6).map(|i| ThreadId::new(format!("t{i}"))).collect();
    for (i, thread) in threads.iter().enumerate() {
        h.start(thread, &format!("actor{i}")).await;
    }

    let mut next_id = 0_u64;
    for n in 0..10 {
        for (i, thread) in threads.iter().enumerate() {
            next_id += 1;
            h.post_and_submit(thread, next_id, &format!("actor{i}"), &format!("{thread}:{n}"));
        }
    }
    h.processor.shutdown().await;

    assert_eq!(h.agent.max_active_per_thread(), 1);
    for thread in &threads {
        let expected: Vec<String> = (0..10).map(|n| format!("{thread}:{n}")).collect();
        assert_eq!(h.agent.prompts_for(thread.as_str()), expected);

        let user_turns: Vec<String> = h
            .store
            .turns(thread, None)
            .await
            .unwrap()
            .into_iter()
            .filter(|t| t.role == TurnRole::User)
            .map(|t| t.content)
            .collect();
        assert_eq!(user_turns, expected);

        assert!(!h.processor.queue().is_busy(thread));
        assert_eq!(h.processor.state(thread), ThreadState::Idle);
    }
    assert_eq!(h.agent.call_count(), 60);
    assert_eq!(h.processor.queue().stats().total_queued_messages, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submits_on_one_thread_run_one_at_a_time() {
    const SUBMITTERS: u64 = 16;

    let h = harness(generous()).await;
    let thread = ThreadId::from("t");
    h.start(&thread, "alice").await;

    let barrier = Arc::new(Barrier::new(SUBMITTERS as usize));
    let mut submitters = Vec::new();
    for id in 1..=SUBMITTERS {
        let processor = h.processor.clone();
        let resolver = h.resolver.clone();
        let barrier = Arc::clone(&barrier);
        let thread = thread.clone();
        submitters.push(tokio::spawn(async move {
            let text = format!("t:{id}");
            resolver.post(&thread, id, "alice", &text);
            barrier.wait().await;
            processor.submit(IncomingMessage {
                thread_id: thread,
                message_id: MessageId::from(id),
                actor_id: ActorId::from("alice"),
                content: text,
                has_attachments: false,
            });
        }));
    }
    for submitter in submitters {
        submitter.await.unwrap();
    }
    h.processor.shutdown().await;

    assert_eq!(h.agent.max_active_per_thread(), 1);
    let mut prompts = h.agent.prompts_for("t");
    prompts.sort();
    let mut expected: Vec<String> = (1..=SUBMITTERS).map(|id| format!("t:{id}")).collect();
    expected.sort();
    assert_eq!(prompts, expected);

    let assistant_turns = h
        .store
        .turns(&thread, None)
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.role == TurnRole::Assistant)
        .count();
    assert_eq!(assistant_turns, SUBMITTERS as usize);
    assert!(!h.processor.queue().is_busy(&thread));
    assert_eq!(h.processor.state(&thread), ThreadState::Idle);
}

#[tokio::test]
async fn starting_a_busy_thread_keeps_it_running() {
    let h = harness(generous()).await;
    let thread = ThreadId::from("t");
    h.start(&thread, "alice").await;

    h.post_and_submit(&thread, 1, "alice", "t:hold");
    h.agent.held.notified().await;
    assert_eq!(h.processor.state(&thread), ThreadState::Running);

    // The session already exists, so this fails without touching the worker.
    let again = h
        .processor
        .start_thread(&thread, &ActorId::from("alice"), None, None)
        .await;
    assert!(again.is_err());
    assert_eq!(h.processor.state(&thread), ThreadState::Running);
    assert!(h.processor.queue().is_busy(&thread));

    h.agent.release.notify_one();
    h.processor.shutdown().await;
    assert_eq!(h.processor.state(&thread), ThreadState::Idle);
    assert_eq!(h.agent.prompts_for("t"), ["t:hold"]);
}

#[tokio::test]
async fn retracted_message_is_never_processed() {
    let h = harness(generous()).await;
    let thread = ThreadId::from("t");
    h.start(&thread, "alice").await;

    let lock = h.processor.queue().lock_for(&thread);
    let held = lock.lock().await;
    assert_eq!(h.post_and_submit(&thread, 1, "alice", "t:first"), 0);
    assert_eq!(h.post_and_submit(&thread, 2, "alice", "t:second"), 1);
    assert_eq!(h.post_and_submit(&thread, 3, "alice", "t:third"), 2);
    assert!(h.processor.retract(&thread, &MessageId::from(2_u64)));
    assert_eq!(h.processor.queue().queue_length(&thread), 2);
    drop(held);

    h.processor.shutdown().await;
    assert_eq!(h.agent.prompts_for("t"), ["t:first", "t:third"]);
}

#[tokio::test]
async fn busy_flag_clears_after_agent_timeout() {
    let h = harness(generous()).await;
    let thread = ThreadId::from("t");
    h.start(&thread, "alice").await;

    h.post_and_submit(&thread, 1, "alice", "t:timeout");
    h.post_and_submit(&thread, 2, "alice", "t:after");
    h.processor.shutdown().await;

    assert!(!h.processor.queue().is_busy(&thread));
    assert_eq!(h.agent.prompts_for("t"), ["t:timeout", "t:after"]);

    let texts = h.outbound.texts(&thread);
    assert!(texts.iter().any(|t| t.contains("ran out of time")));
    assert!(texts.iter().any(|t| t == "echo t:after"));

    let turns = h.store.turns(&thread, None).await.unwrap();
    assert!(
        turns
            .iter()
            .any(|t| t.role == TurnRole::Assistant && t.content.starts_with("[error]"))
    );

    // The queue accepts and processes new work afterwards.
    h.post_and_submit(&thread, 3, "alice", "t:again");
    h.processor.shutdown().await;
    assert_eq!(h.agent.call_count(), 3);
}

#[tokio::test]
async fn rate_limited_message_is_rejected_with_retry_hint() {
    let h = harness(RateLimitConfig {
        per_minute: 2,
        per_hour: 100,
    })
    .await;
    let thread = ThreadId::from("t");
    h.start(&thread, "alice").await;

    for id in 1..=3 {
        h.post_and_submit(&thread, id, "alice", &format!("t:{id}"));
    }
    h.processor.shutdown().await;

    assert_eq!(h.agent.prompts_for("t"), ["t:1", "t:2"]);
    let texts = h.outbound.texts(&thread);
    let notice = texts
        .iter()
        .find(|t| t.contains("too quickly"))
        .expect("rate limit notice");
    assert!(notice.contains("seconds"));

    let err = h.processor.admit(&ActorId::from("alice")).unwrap_err();
    assert!(matches!(err, parley_chat::ChatError::AdmissionDenied {
        retry_after_seconds
    } if (1..=60).contains(&retry_after_seconds)));
    assert!(h.processor.admit(&ActorId::from("bob")).is_ok());
}

#[tokio::test]
async fn continuation_token_carries_forward_and_survives_failure() {
    let h = harness(generous()).await;
    let thread = ThreadId::from("t");
    h.start(&thread, "alice").await;

    h.post_and_submit(&thread, 1, "alice", "t:one");
    h.post_and_submit(&thread, 2, "alice", "t:two");
    h.post_and_submit(&thread, 3, "alice", "t:fail");
    h.post_and_submit(&thread, 4, "alice", "t:four");
    h.processor.shutdown().await;

    assert_eq!(h.agent.tokens_seen(), [
        None,
        Some("tok-t:one".to_string()),
        Some("tok-t:two".to_string()),
        Some("tok-t:two".to_string()),
    ]);
    let session = h.store.get(&thread).await.unwrap().unwrap();
    assert_eq!(session.continuation_token.as_deref(), Some("tok-t:four"));

    let texts = h.outbound.texts(&thread);
    assert!(texts.iter().any(|t| t.contains("process exited with status 1")));
    assert!(texts.contains(&"processing... (new conversation)".to_string()));
    assert!(texts.contains(&"processing... (continuing conversation)".to_string()));

    let tools = h.store.tool_records(&thread, None).await.unwrap();
    assert_eq!(tools.len(), 3);
    assert!(tools.iter().all(|t| t.tool_name == "Read"));
}

#[tokio::test]
async fn draining_an_empty_queue_does_nothing() {
    let h = harness(generous()).await;
    let thread = ThreadId::from("nobody-here");

    h.processor.drain(&thread).await;
    h.processor.drain(&thread).await;

    assert_eq!(h.agent.call_count(), 0);
    assert!(!h.processor.queue().is_busy(&thread));
    assert_eq!(h.processor.state(&thread), ThreadState::Idle);
    assert!(h.outbound.texts(&thread).is_empty());
}

#[tokio::test]
async fn vanished_message_is_skipped_silently() {
    let h = harness(generous()).await;
    let thread = ThreadId::from("t");
    h.start(&thread, "alice").await;

    // Never posted to the resolver: it was deleted on the platform.
    h.processor.submit(IncomingMessage {
        thread_id: thread.clone(),
        message_id: MessageId::from(9_u64),
        actor_id: ActorId::from("alice"),
        content: "t:gone".into(),
        has_attachments: false,
    });
    h.post_and_submit(&thread, 10, "alice", "t:kept");
    h.processor.shutdown().await;

    assert_eq!(h.agent.prompts_for("t"), ["t:kept"]);
    assert!(!h.outbound.texts(&thread).iter().any(|t| t.contains("gone")));
}

#[tokio::test]
async fn message_without_session_gets_a_notice() {
    let h = harness(generous()).await;
    let thread = ThreadId::from("orphan");

    h.post_and_submit(&thread, 1, "alice", "orphan:hello");
    h.processor.shutdown().await;

    assert_eq!(h.agent.call_count(), 0);
    assert!(
        h.outbound
            .texts(&thread)
            .iter()
            .any(|t| t.contains("No active session"))
    );
}

#[tokio::test]
async fn unknown_profile_aborts_the_drain() {
    let h = harness(generous()).await;
    let thread = ThreadId::from("t");
    h.store
        .create(&thread, &ActorId::from("alice"), "ghost")
        .await
        .unwrap();

    let lock = h.processor.queue().lock_for(&thread);
    let held = lock.lock().await;
    h.post_and_submit(&thread, 1, "alice", "t:one");
    h.post_and_submit(&thread, 2, "alice", "t:two");
    drop(held);
    h.processor.shutdown().await;

    // Each drain stops at the first message; nothing reaches the agent.
    assert_eq!(h.agent.call_count(), 0);
    assert!(!h.processor.queue().is_busy(&thread));
    assert!(
        h.outbound
            .texts(&thread)
            .iter()
            .any(|t| t.contains("misconfigured"))
    );

    let turns = h.store.turns(&thread, None).await.unwrap();
    assert!(!turns.is_empty());
    assert!(turns.iter().all(|t| {
        t.role == TurnRole::Assistant && t.content.starts_with("[error] configuration error")
    }));
}

#[tokio::test]
async fn thread_started_event_creates_session_and_runs_opening_message() {
    let h = harness(generous()).await;
    let thread = ThreadId::from("fresh");
    h.resolver.post(&thread, 1, "alice", "fresh:hi");

    h.processor
        .handle_inbound(ChatEvent::ThreadStarted {
            thread_id: thread.clone(),
            actor_id: ActorId::from("alice"),
            profile: Some("helper".into()),
            message_id: Some(MessageId::from(1_u64)),
            text: Some("fresh:hi".into()),
        })
        .await
        .unwrap();
    h.processor.shutdown().await;

    let session = h.store.get(&thread).await.unwrap().unwrap();
    assert_eq!(session.agent_profile, "helper");
    assert_eq!(h.agent.prompts_for("fresh"), ["fresh:hi"]);

    let again = h
        .processor
        .handle_inbound(ChatEvent::ThreadStarted {
            thread_id: thread.clone(),
            actor_id: ActorId::from("alice"),
            profile: None,
            message_id: None,
            text: None,
        })
        .await;
    assert!(again.is_err());
}

#[tokio::test]
async fn deleted_event_retracts_queued_message() {
    let h = harness(generous()).await;
    let thread = ThreadId::from("t");
    h.start(&thread, "alice").await;

    let lock = h.processor.queue().lock_for(&thread);
    let held = lock.lock().await;
    for id in 1..=2 {
        h.resolver.post(&thread, id, "alice", &format!("t:{id}"));
        h.processor
            .handle_inbound(ChatEvent::MessageCreated {
                thread_id: thread.clone(),
                message_id: MessageId::from(id),
                actor_id: ActorId::from("alice"),
                text: format!("t:{id}"),
                attachments: Vec::new(),
            })
            .await
            .unwrap();
    }
    h.processor
        .handle_inbound(ChatEvent::MessageDeleted {
            thread_id: thread.clone(),
            message_id: MessageId::from(1_u64),
        })
        .await
        .unwrap();
    drop(held);
    h.processor.shutdown().await;

    assert_eq!(h.agent.prompts_for("t"), ["t:2"]);
}
