//! The canonical event taxonomy every adapter normalizes into.

use serde::{Deserialize, Serialize};

/// Display metadata attached to tool-call messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolMeta {
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines_added: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines_removed: Option<u32>,
}

impl ToolMeta {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            lines_added: None,
            lines_removed: None,
        }
    }

    pub fn with_lines(mut self, added: u32, removed: u32) -> Self {
        self.lines_added = Some(added);
        self.lines_removed = Some(removed);
        self
    }
}

/// Tool name used for reasoning blocks so the UI renders them collapsed.
pub const THINKING_TOOL: &str = "Thinking";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionItem {
    pub question: String,
    #[serde(default)]
    pub header: String,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    #[serde(default)]
    pub multi_select: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub label: String,
    #[serde(default)]
    pub description: String,
}

/// One normalized event. Serialized with a camelCase `kind` tag, e.g.
/// `{"kind":"bashOutput","text":"..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum AgentEvent {
    /// Streaming assistant text (a delta, not a full message).
    Text { text: String },

    /// Output of a shell command, rendered terminal-style.
    BashOutput { text: String },

    /// A complete message. With `tool_meta` it describes a tool call.
    /// `parent_tool_use_id` nests the message under a sub-agent call;
    /// `tool_use_id` identifies a sub-agent call itself.
    Message {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_meta: Option<ToolMeta>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_tool_use_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_use_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_info: Option<bool>,
    },

    /// The agent asks permission to run a tool. `request_id` must be handed
    /// back unchanged to `send_tool_approval`.
    ToolApproval {
        request_id: String,
        name: String,
        input: serde_json::Value,
        display_input: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command_prefixes: Option<Vec<String>>,
        /// Already answered by the approval policy; never shown as a prompt.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        auto_approved: bool,
    },

    Question {
        request_id: String,
        questions: Vec<QuestionItem>,
        raw_input: serde_json::Value,
    },

    PlanApproval { request_id: String, content: String },

    SessionId { session_id: String },

    /// The current user turn finished. Recurs once per turn.
    TurnComplete,

    /// The backing process is gone. At most once per process lifetime.
    Done,
}

impl AgentEvent {
    pub fn message(content: impl Into<String>) -> Self {
        AgentEvent::Message {
            content: content.into(),
            tool_meta: None,
            parent_tool_use_id: None,
            tool_use_id: None,
            is_info: None,
        }
    }

    /// A non-fatal notice for the user (rate limits, missing tools, ...).
    pub fn info(content: impl Into<String>) -> Self {
        AgentEvent::Message {
            content: content.into(),
            tool_meta: None,
            parent_tool_use_id: None,
            tool_use_id: None,
            is_info: Some(true),
        }
    }

    pub fn tool_message(content: impl Into<String>, meta: ToolMeta) -> Self {
        AgentEvent::Message {
            content: content.into(),
            tool_meta: Some(meta),
            parent_tool_use_id: None,
            tool_use_id: None,
            is_info: None,
        }
    }

    pub fn thinking(text: impl Into<String>) -> Self {
        Self::tool_message(text, ToolMeta::new(THINKING_TOOL))
    }

    /// Events that wait for a user decision.
    pub fn is_prompt(&self) -> bool {
        matches!(
            self,
            AgentEvent::ToolApproval { .. }
                | AgentEvent::Question { .. }
                | AgentEvent::PlanApproval { .. }
        )
    }
}
