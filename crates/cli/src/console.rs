//! `parley run`: a line-oriented console channel.
//!
//! Reads one JSON [`ChatEvent`] per line from stdin and writes every outbound
//! message as a `{"thread_id": .., "text": ..}` line on stdout. Logs go to
//! stderr so stdout stays machine-readable.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    anyhow::Context,
    async_trait::async_trait,
    dashmap::DashMap,
    parley_agents::CliAgentInvoker,
    parley_channels::{ChannelOutbound, ChatEvent, MessageResolver, ResolvedMessage},
    parley_chat::{Collaborators, ProcessorConfig, RateLimiter, ThreadProcessor},
    parley_common::{MessageId, ThreadId},
    parley_config::{ParleyConfig, ProfileRegistry},
    parley_media::HttpAttachmentFetcher,
    parley_sessions::SqliteSessionStore,
    serde::Serialize,
    tokio::{
        io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
        sync::Mutex,
    },
    tracing::{debug, info, warn},
};

#[derive(Serialize)]
struct OutboundLine<'a> {
    thread_id: &'a ThreadId,
    text: &'a str,
}

/// Writes outbound messages as JSON lines.
pub struct ConsoleOutbound<W> {
    out: Mutex<W>,
}

impl<W> ConsoleOutbound<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> ChannelOutbound for ConsoleOutbound<W> {
    async fn send_text(&self, thread_id: &ThreadId, text: &str) -> parley_channels::Result<()> {
        let mut line = serde_json::to_vec(&OutboundLine { thread_id, text })?;
        line.push(b'\n');
        let mut out = self.out.lock().await;
        out.write_all(&line).await?;
        out.flush().await?;
        Ok(())
    }
}

/// Messages seen on the console that have not been deleted.
#[derive(Default)]
pub struct ConsoleResolver {
    live: DashMap<(ThreadId, MessageId), ResolvedMessage>,
}

impl ConsoleResolver {
    /// Track creations and deletions before the event reaches the processor.
    pub fn observe(&self, event: &ChatEvent) {
        match event {
            ChatEvent::MessageCreated {
                thread_id,
                message_id,
                actor_id,
                text,
                attachments,
            } => {
                self.live
                    .insert((thread_id.clone(), message_id.clone()), ResolvedMessage {
                        message_id: message_id.clone(),
                        actor_id: actor_id.clone(),
                        text: text.clone(),
                        attachments: attachments.clone(),
                    });
            },
            ChatEvent::MessageDeleted {
                thread_id,
                message_id,
            } => {
                self.live.remove(&(thread_id.clone(), message_id.clone()));
            },
            ChatEvent::ThreadStarted {
                thread_id,
                actor_id,
                message_id: Some(message_id),
                text: Some(text),
                ..
            } => {
                self.live
                    .insert((thread_id.clone(), message_id.clone()), ResolvedMessage {
                        message_id: message_id.clone(),
                        actor_id: actor_id.clone(),
                        text: text.clone(),
                        attachments: Vec::new(),
                    });
            },
            ChatEvent::ThreadStarted { .. } => {},
        }
    }
}

#[async_trait]
impl MessageResolver for ConsoleResolver {
    async fn resolve(
        &self,
        thread_id: &ThreadId,
        message_id: &MessageId,
    ) -> parley_channels::Result<Option<ResolvedMessage>> {
        Ok(self
            .live
            .get(&(thread_id.clone(), message_id.clone()))
            .map(|entry| entry.value().clone()))
    }
}

/// Wire the processor from config.
pub async fn build_processor(
    config: &ParleyConfig,
    database_path: &Path,
    outbound: Arc<dyn ChannelOutbound>,
    resolver: Arc<dyn MessageResolver>,
) -> anyhow::Result<ThreadProcessor> {
    let store = SqliteSessionStore::open(database_path)
        .await
        .with_context(|| format!("failed to open {}", database_path.display()))?;

    let profiles = ProfileRegistry::discover(
        &config.profiles.dir,
        config.profiles.base_system_prompt.as_deref(),
        config.profiles.default.clone(),
    );
    if profiles.is_empty() {
        warn!(dir = %config.profiles.dir.display(), "no agent profiles found");
    }

    let invoker = CliAgentInvoker::from_config(&config.agent)?;
    info!(program = %invoker.program().display(), profiles = profiles.len(), "agent ready");

    let deps = Collaborators {
        store: Arc::new(store),
        invoker: Arc::new(invoker),
        outbound,
        resolver,
        profiles: Arc::new(profiles),
        fetcher: Some(Arc::new(HttpAttachmentFetcher::new(config.attachments))),
    };
    Ok(ThreadProcessor::new(
        deps,
        RateLimiter::new(config.rate_limit),
        ProcessorConfig::from(&config.output),
    ))
}

/// Feed console lines into the processor until EOF or Ctrl-C, then wait for
/// in-flight work.
pub async fn pump<R: AsyncBufRead + Unpin>(
    processor: &ThreadProcessor,
    resolver: &ConsoleResolver,
    input: R,
) -> anyhow::Result<()> {
    let mut lines = input.lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, finishing in-flight work");
                break;
            },
        };
        let Some(line) = line else {
            debug!("console input closed");
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event: ChatEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "ignoring malformed console line");
                continue;
            },
        };
        resolver.observe(&event);
        if let Err(e) = processor.handle_inbound(event).await {
            warn!(error = %e, "console event rejected");
        }
    }

    processor.shutdown().await;
    Ok(())
}

pub async fn handle_run(config: ParleyConfig, database_path: PathBuf) -> anyhow::Result<()> {
    let resolver = Arc::new(ConsoleResolver::default());
    let outbound = Arc::new(ConsoleOutbound::new(tokio::io::stdout()));
    let processor =
        build_processor(&config, &database_path, outbound, resolver.clone()).await?;

    info!(database = %database_path.display(), "console channel ready, reading events from stdin");
    pump(&processor, &resolver, BufReader::new(tokio::io::stdin())).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, parley_common::ActorId};

    #[tokio::test]
    async fn outbound_writes_json_lines() {
        let outbound = ConsoleOutbound::new(Vec::new());
        let thread = ThreadId::from("t1");
        outbound.send_text(&thread, "hello").await.unwrap();
        outbound.send_text(&thread, "two\nlines").await.unwrap();

        let written = String::from_utf8(outbound.out.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = written
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["thread_id"], "t1");
        assert_eq!(lines[1]["text"], "two\nlines");
    }

    #[tokio::test]
    async fn resolver_tracks_creations_and_deletions() {
        let resolver = ConsoleResolver::default();
        let thread = ThreadId::from("t");
        let message = MessageId::from(1_u64);

        resolver.observe(&ChatEvent::MessageCreated {
            thread_id: thread.clone(),
            message_id: message.clone(),
            actor_id: ActorId::from("alice"),
            text: "hi".into(),
            attachments: Vec::new(),
        });
        let found = resolver.resolve(&thread, &message).await.unwrap().unwrap();
        assert_eq!(found.text, "hi");

        resolver.observe(&ChatEvent::MessageDeleted {
            thread_id: thread.clone(),
            message_id: message.clone(),
        });
        assert!(resolver.resolve(&thread, &message).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn opening_message_of_new_thread_is_resolvable() {
        let resolver = ConsoleResolver::default();
        let thread = ThreadId::from("t");
        resolver.observe(&ChatEvent::ThreadStarted {
            thread_id: thread.clone(),
            actor_id: ActorId::from("alice"),
            profile: None,
            message_id: Some(MessageId::from(7_u64)),
            text: Some("start".into()),
        });
        assert!(
            resolver
                .resolve(&thread, &MessageId::from(7_u64))
                .await
                .unwrap()
                .is_some()
        );
    }
}
