//! Agent CLI transport.
//!
//! Spawns a claude-compatible CLI in `--print --output-format stream-json`
//! mode, writes the prompt to its stdin and turns each stdout line into
//! [`AgentEvent`]s.

use std::{ffi::OsString, path::PathBuf, process::Stdio, time::Duration};

use {
    async_trait::async_trait,
    parley_config::AgentCliConfig,
    tokio::{
        io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader},
        process::Command,
        task::JoinHandle,
        time::Instant,
    },
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use parley_metrics::{agent as agent_metrics, counter};

use crate::{
    error::{Context, Error, Result},
    event::decode_line,
    invoker::{AgentInvoker, AgentRun, InvokeRequest},
    locate::locate_agent_cli,
};

/// Lines of stderr kept for error messages.
const STDERR_TAIL_LINES: usize = 20;

/// How long the process may keep running after it printed its result.
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// Runs each invocation as a fresh agent CLI process.
#[derive(Debug, Clone)]
pub struct CliAgentInvoker {
    program: PathBuf,
    max_turns: u32,
    timeout: Duration,
    exit_grace: Duration,
    permission_mode: Option<String>,
    allowed_tools: Vec<String>,
    extra_args: Vec<String>,
}

impl CliAgentInvoker {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let defaults = AgentCliConfig::default();
        Self {
            program: program.into(),
            max_turns: defaults.max_turns,
            timeout: Duration::from_secs(defaults.timeout_secs),
            exit_grace: EXIT_GRACE,
            permission_mode: Some(defaults.permission_mode),
            allowed_tools: defaults.allowed_tools,
            extra_args: Vec::new(),
        }
    }

    /// Build from config, locating the CLI when no path is configured.
    pub fn from_config(config: &AgentCliConfig) -> Result<Self> {
        let program = match &config.cli_path {
            Some(path) => path.clone(),
            None => locate_agent_cli().ok_or(Error::CliNotFound)?,
        };
        Ok(Self {
            program,
            max_turns: config.max_turns,
            timeout: Duration::from_secs(config.timeout_secs),
            exit_grace: EXIT_GRACE,
            permission_mode: Some(config.permission_mode.clone()).filter(|m| !m.is_empty()),
            allowed_tools: config.allowed_tools.clone(),
            extra_args: config.extra_args.clone(),
        })
    }

    #[must_use]
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Time allowed for the process to exit once it has printed its result.
    /// It is killed afterwards; the result stands.
    #[must_use]
    pub fn with_exit_grace(mut self, grace: Duration) -> Self {
        self.exit_grace = grace;
        self
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    /// Command-line arguments for one invocation. The prompt itself goes to
    /// stdin.
    pub fn build_args(&self, request: &InvokeRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--print".into(),
            "--output-format".into(),
            "stream-json".into(),
            "--verbose".into(),
            "--max-turns".into(),
            self.max_turns.to_string().into(),
        ];
        if let Some(token) = &request.continuation_token {
            args.push("--resume".into());
            args.push(token.into());
        }
        if let Some(prompt) = request.system_prompt.as_deref().filter(|p| !p.is_empty()) {
            args.push("--append-system-prompt".into());
            args.push(prompt.into());
        }
        if let Some(mode) = &self.permission_mode {
            args.push("--permission-mode".into());
            args.push(mode.into());
        }
        let tools = request.allowed_tools.as_ref().unwrap_or(&self.allowed_tools);
        if !tools.is_empty() {
            args.push("--allowedTools".into());
            args.push(tools.join(",").into());
        }
        args.extend(self.extra_args.iter().map(OsString::from));
        args
    }
}

fn collect_stderr(stderr: impl AsyncRead + Unpin + Send + 'static) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut tail = std::collections::VecDeque::with_capacity(STDERR_TAIL_LINES);
        while let Ok(Some(line)) = lines.next_line().await {
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
        Vec::from(tail).join("\n")
    })
}

async fn stderr_tail(handle: Option<JoinHandle<String>>) -> String {
    match handle {
        Some(handle) => match tokio::time::timeout(Duration::from_millis(500), handle).await {
            Ok(Ok(tail)) if !tail.trim().is_empty() => format!(": {}", tail.trim()),
            _ => String::new(),
        },
        None => String::new(),
    }
}

#[async_trait]
impl AgentInvoker for CliAgentInvoker {
    async fn invoke(&self, request: InvokeRequest) -> Result<AgentRun> {
        let args = self.build_args(&request);
        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .current_dir(&request.workspace)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            program: self.program.clone(),
            source,
        })?;

        info!(
            program = %self.program.display(),
            workspace = %request.workspace.display(),
            resume = request.continuation_token.is_some(),
            max_turns = self.max_turns,
            "agent invocation started"
        );

        #[cfg(feature = "metrics")]
        counter!(agent_metrics::INVOCATIONS_TOTAL).increment(1);

        let mut stdin = child.stdin.take().context("agent stdin was not piped")?;
        stdin
            .write_all(request.prompt.as_bytes())
            .await
            .context("failed to send prompt to agent")?;
        stdin.shutdown().await.context("failed to close agent stdin")?;
        drop(stdin);

        let stdout = child.stdout.take().context("agent stdout was not piped")?;
        let stderr = child.stderr.take().map(collect_stderr);

        let deadline = Instant::now() + self.timeout;
        let timeout_secs = self.timeout.as_secs();
        let turn_budget = self.max_turns.saturating_add(1);
        let exit_grace = self.exit_grace;

        Ok(AgentRun::new(async_stream::stream! {
            let mut child = child;
            let mut lines = BufReader::new(stdout).lines();
            let mut turns: u32 = 0;
            let mut finished = false;

            loop {
                let line = match tokio::time::timeout_at(deadline, lines.next_line()).await {
                    Err(_) => {
                        let _ = child.start_kill();
                        warn!(timeout_secs, "agent invocation timed out");
                        yield Err(Error::timeout(format!("no result within {timeout_secs}s")));
                        return;
                    },
                    Ok(Err(e)) => {
                        let _ = child.start_kill();
                        yield Err(Error::transport(format!("failed to read agent output: {e}")));
                        return;
                    },
                    Ok(Ok(None)) => break,
                    Ok(Ok(Some(line))) => line,
                };

                if line.trim().is_empty() {
                    continue;
                }

                let decoded = match decode_line(&line) {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        debug!(error = %e, "skipping undecodable agent output line");
                        continue;
                    },
                };

                if decoded.is_turn {
                    turns += 1;
                    if turns > turn_budget {
                        let _ = child.start_kill();
                        warn!(turns, "agent exceeded its turn budget");
                        yield Err(Error::timeout(format!("exceeded {turn_budget} turns")));
                        return;
                    }
                }

                for event in decoded.events {
                    finished |= event.is_final();
                    yield Ok(event);
                }

                if let Some(failure) = decoded.failure {
                    let _ = child.start_kill();
                    yield Err(failure);
                    return;
                }

                if finished {
                    break;
                }
            }

            let exit_by = if finished {
                deadline.min(Instant::now() + exit_grace)
            } else {
                deadline
            };
            match tokio::time::timeout_at(exit_by, child.wait()).await {
                Ok(Ok(status)) if finished => {
                    debug!(%status, turns, "agent process exited");
                },
                Ok(Ok(status)) => {
                    let tail = stderr_tail(stderr).await;
                    yield Err(Error::transport(format!(
                        "agent exited with {status} before producing a result{tail}"
                    )));
                },
                Ok(Err(e)) => {
                    if !finished {
                        yield Err(Error::transport(format!("failed to wait for agent: {e}")));
                    }
                },
                Err(_) => {
                    let _ = child.start_kill();
                    if finished {
                        warn!(turns, "agent kept running after its result, killed");
                    } else {
                        yield Err(Error::timeout(format!("no result within {timeout_secs}s")));
                    }
                },
            }
        }))
    }
}
