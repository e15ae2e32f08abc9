//! Is the agent CLI installed?
//!
//! A missing binary shows up in three ways: the spawn itself fails, the
//! login shell prints "command not found" on stderr, or the shell exits with
//! 127. All of them are run through [`is_not_installed`]; a hit marks the
//! agent unavailable in [`ToolAvailability`] and turns the error into install
//! instructions.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::agents::AgentKind;
use crate::error::AgentError;
use crate::sync::lock;

const NOT_INSTALLED_SIGNATURES: &[&str] = &[
    "command not found",
    "enoent",
    "no such file or directory",
    "not found",
    "cannot find",
];

/// Does this spawn error / shell diagnostic mean the CLI is missing?
pub fn is_not_installed(message: &str) -> bool {
    let message = message.to_lowercase();
    NOT_INSTALLED_SIGNATURES
        .iter()
        .any(|signature| message.contains(signature))
}

fn install_command(agent: AgentKind) -> &'static str {
    match agent {
        AgentKind::Claude => "npm install -g @anthropic-ai/claude-code",
        AgentKind::Codex => "npm install -g @openai/codex",
        AgentKind::Copilot => "npm install -g @github/copilot",
        AgentKind::Gemini => "npm install -g @google/gemini-cli",
        AgentKind::OpenCode => "npm install -g opencode-ai",
    }
}

/// User-facing, multi-line explanation of how to get `agent` installed.
pub fn install_instructions(agent: AgentKind, binary_path: &str) -> String {
    format!(
        "{name} CLI not found (tried `{binary_path}`).\n\n\
         Install it with:\n    {install}\n\n\
         If it is already installed, set its full path in the agent settings.",
        name = agent.display_name(),
        install = install_command(agent),
    )
}

/// Shared record of which agent CLIs turned out to be missing.
#[derive(Debug, Default)]
pub struct ToolAvailability {
    missing: Mutex<HashMap<AgentKind, String>>,
}

impl ToolAvailability {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_unavailable(&self, agent: AgentKind, reason: impl Into<String>) {
        let reason = reason.into();
        log::warn!("{} marked unavailable: {reason}", agent.display_name());
        lock(&self.missing).insert(agent, reason);
    }

    pub fn mark_available(&self, agent: AgentKind) {
        lock(&self.missing).remove(&agent);
    }

    pub fn is_available(&self, agent: AgentKind) -> bool {
        !lock(&self.missing).contains_key(&agent)
    }

    pub fn unavailable_reason(&self, agent: AgentKind) -> Option<String> {
        lock(&self.missing).get(&agent).cloned()
    }

    /// Classify a failure message. Missing tools are recorded and rewritten
    /// into [`AgentError::ToolNotInstalled`]; anything else is `None` and the
    /// caller keeps its original error.
    pub fn classify(&self, agent: AgentKind, binary_path: &str, message: &str) -> Option<AgentError> {
        if !is_not_installed(message) {
            return None;
        }
        self.mark_unavailable(agent, message);
        Some(AgentError::ToolNotInstalled {
            agent,
            instructions: install_instructions(agent, binary_path),
        })
    }
}
