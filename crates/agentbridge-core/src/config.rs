//! Runtime settings for launching agent backends.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agents::AgentKind;

/// Where the agent CLIs live and how long to wait on them.
///
/// Every field has a default, so a settings file only needs the keys the
/// user actually changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub claude_path: String,
    pub codex_path: String,
    pub copilot_path: String,
    pub gemini_path: String,
    pub opencode_path: String,

    /// Shell prefix used to launch agents, e.g. `/bin/zsh -l -c`.
    /// `None` means `$SHELL -l -c`.
    pub agent_shell: Option<String>,

    /// Upper bound on how long a JSON-RPC request may stay unanswered.
    pub request_timeout_secs: u64,

    pub opencode_base_port: u16,
    pub opencode_health_retries: u32,
    pub opencode_health_interval_ms: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            claude_path: "claude".to_string(),
            codex_path: "codex".to_string(),
            copilot_path: "copilot".to_string(),
            gemini_path: "gemini".to_string(),
            opencode_path: "opencode".to_string(),
            agent_shell: None,
            request_timeout_secs: 60,
            opencode_base_port: 14096,
            opencode_health_retries: 50,
            opencode_health_interval_ms: 200,
        }
    }
}

impl AgentSettings {
    /// Load settings from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn binary_path(&self, agent: AgentKind) -> &str {
        match agent {
            AgentKind::Claude => &self.claude_path,
            AgentKind::Codex => &self.codex_path,
            AgentKind::Copilot => &self.copilot_path,
            AgentKind::Gemini => &self.gemini_path,
            AgentKind::OpenCode => &self.opencode_path,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn opencode_health_interval(&self) -> Duration {
        Duration::from_millis(self.opencode_health_interval_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to read settings: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid settings file: {0}")]
    Json(#[from] serde_json::Error),
}
