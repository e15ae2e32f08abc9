//! # agentbridge-core
//!
//! Drives AI coding-agent CLIs (Claude, Codex, Copilot, Gemini, OpenCode)
//! as child processes and normalizes their output into one event stream.
//!
//! ## Key Concepts
//!
//! - **Chat**: a conversation identified by a caller-chosen id
//! - **Turn**: a user message and the agent's complete response
//! - **AgentEvent**: unified event type across all agent backends
//! - **AgentService**: the contract every adapter implements; see
//!   [`AgentDispatcher`] for routing chats to adapters

pub mod agents;
pub mod approval;
pub mod availability;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod logging;
pub mod managers;
pub mod persistence;
pub mod shell;
pub mod spawn;
pub mod transport;

pub(crate) mod sync;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use agents::{AgentEvent, AgentKind};
pub use approval::{ApprovalContext, ProjectApprovals};
pub use config::AgentSettings;
pub use error::{AgentError, TransportError};
pub use event_bus::EventBus;
pub use managers::{
    AgentContext, AgentDispatcher, AgentService, SendMessageRequest, ToolApprovalDecision,
};
pub use persistence::{EventSink, JsonlEventSink};
pub use transport::{LocalTransport, Transport};
