//! Wire protocols of the supported agents and their normalization into
//! [`AgentEvent`].
//!
//! Each agent module holds a spawn config (`*Config::build`), the native
//! wire types, and a parser that turns native messages into canonical
//! events. Process and session lifecycle lives in [`crate::managers`].

pub mod claude;
pub mod codex;
pub mod copilot;
pub mod event;
pub mod gemini;
pub mod line_buffer;
pub mod opencode;
pub mod rpc;
pub mod tool_input;

use serde::{Deserialize, Serialize};

pub use event::{AgentEvent, QuestionItem, QuestionOption, ToolMeta};

/// The supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Claude,
    Codex,
    Copilot,
    Gemini,
    OpenCode,
}

impl AgentKind {
    pub const ALL: [AgentKind; 5] = [
        AgentKind::Claude,
        AgentKind::Codex,
        AgentKind::Copilot,
        AgentKind::Gemini,
        AgentKind::OpenCode,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentKind::Claude => "claude",
            AgentKind::Codex => "codex",
            AgentKind::Copilot => "copilot",
            AgentKind::Gemini => "gemini",
            AgentKind::OpenCode => "opencode",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            AgentKind::Claude => "Claude",
            AgentKind::Codex => "Codex",
            AgentKind::Copilot => "Copilot",
            AgentKind::Gemini => "Gemini",
            AgentKind::OpenCode => "OpenCode",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown agent `{s}`"))
    }
}

/// Prepend the conversation's init prompt to its first message.
pub(crate) fn compose_prompt(init_prompt: Option<&str>, prompt: &str, first_turn: bool) -> String {
    match init_prompt.map(str::trim).filter(|p| !p.is_empty()) {
        Some(init) if first_turn => format!("{init}\n\n{prompt}"),
        _ => prompt.to_string(),
    }
}
