//! Per-agent adapters behind one [`AgentService`] contract.
//!
//! Each adapter owns the processes of its chats, speaks the agent's wire
//! protocol through [`crate::transport::Transport`], and reports canonical
//! [`crate::agents::AgentEvent`]s to the chat's observer.
//! [`AgentDispatcher`] routes a chat to the adapter it is bound to.

pub mod claude_agent;
pub mod codex_agent;
pub mod context;
pub mod copilot_agent;
pub mod dispatch;
pub mod gemini_agent;
pub mod opencode_agent;
pub mod registry;
pub mod service;

pub use claude_agent::ClaudeAgentManager;
pub use codex_agent::CodexAgentManager;
pub use context::AgentContext;
pub use copilot_agent::CopilotAgentManager;
pub use dispatch::AgentDispatcher;
pub use gemini_agent::GeminiAgentManager;
pub use opencode_agent::OpenCodeAgentManager;
pub use service::{
    AgentService, ChatObservers, DoneCallback, EventCallback, SendMessageRequest,
    ToolApprovalDecision,
};
