//! Agent invocation: the event union, the invoker seam and the agent CLI
//! subprocess transport.

pub mod cli;
pub mod error;
pub mod event;
pub mod invoker;
pub mod locate;

pub use {
    cli::CliAgentInvoker,
    error::{AgentError, Error, Result},
    event::AgentEvent,
    invoker::{AgentInvoker, AgentOutcome, AgentRun, InvokeRequest, OutcomeCollector, ToolCall},
    locate::{cli_version, locate_agent_cli},
};
