//! ACP (Agent Client Protocol) wire types as spoken by `copilot --acp`.
//!
//! Every message carries `"jsonrpc":"2.0"`. Agent output arrives as
//! `session/update` notifications whose `update` member is tagged by
//! `sessionUpdate`; permission prompts are `session/request_permission`
//! server requests.

use serde::Deserialize;
use serde_json::{json, Value};

pub const PROTOCOL_VERSION: u64 = 1;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerMessage {
    pub method: String,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(
    tag = "sessionUpdate",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum SessionUpdate {
    AgentMessageChunk {
        #[serde(default)]
        content: Value,
    },
    AgentThoughtChunk {
        #[serde(default)]
        content: Value,
    },
    ToolCall {
        tool_call_id: String,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        kind: Option<String>,
        #[serde(default)]
        status: Option<String>,
        #[serde(default, alias = "input")]
        raw_input: Option<Value>,
    },
    ToolCallUpdate {
        tool_call_id: String,
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        content: Value,
        #[serde(default, alias = "output")]
        raw_output: Option<Value>,
    },
    Plan {
        #[serde(default, alias = "steps")]
        entries: Vec<PlanEntry>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanEntry {
    #[serde(alias = "description")]
    pub content: String,
    #[serde(default)]
    pub status: String,
}

/// One element of a tool call's `content`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ToolContent {
    /// `{"type":"content","content":{"type":"text","text":...}}`
    Content {
        #[serde(default)]
        content: Value,
    },
    Text {
        #[serde(default)]
        text: String,
    },
    Diff {
        #[serde(default)]
        path: String,
        #[serde(default)]
        old_text: Option<String>,
        #[serde(default)]
        new_text: String,
    },
    TerminalOutput {
        #[serde(default)]
        output: String,
    },
    #[serde(other)]
    Other,
}

/// `content` may be a single item or a list; malformed items are dropped.
pub fn tool_contents(content: &Value) -> Vec<ToolContent> {
    let items = match content {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    };
    items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect()
}

/// Text of a `{"type":"text","text":...}` content block.
pub fn text_of(content: &Value) -> Option<&str> {
    match content.get("type").and_then(Value::as_str) {
        Some("text") | None => content.get("text").and_then(Value::as_str),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    #[serde(default)]
    pub tool_call: PermissionToolCall,
    #[serde(default)]
    pub options: Vec<PermissionOption>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionToolCall {
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub raw_input: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOption {
    pub option_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: String,
}

/// The option to answer with: the offered `allow_once` / `reject_once`
/// option, or those literal ids when the agent offered none of that kind.
pub fn choose_option(options: &[PermissionOption], approved: bool) -> String {
    let kind = if approved { "allow_once" } else { "reject_once" };
    options
        .iter()
        .find(|option| option.kind == kind)
        .map(|option| option.option_id.clone())
        .unwrap_or_else(|| kind.to_string())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub agent_capabilities: AgentCapabilities,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    #[serde(default)]
    pub load_session: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionResult {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResult {
    #[serde(default)]
    pub stop_reason: Option<String>,
}

pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "clientCapabilities": {
            "fs": { "readTextFile": false, "writeTextFile": false },
            "terminal": false,
        },
    })
}

pub fn new_session_params(cwd: &str) -> Value {
    json!({ "cwd": cwd, "mcpServers": [] })
}

pub fn load_session_params(session_id: &str, cwd: &str) -> Value {
    json!({ "sessionId": session_id, "cwd": cwd, "mcpServers": [] })
}

pub fn prompt_params(session_id: &str, text: &str) -> Value {
    json!({
        "sessionId": session_id,
        "prompt": [{ "type": "text", "text": text }],
    })
}

pub fn cancel_params(session_id: &str) -> Value {
    json!({ "sessionId": session_id })
}

pub fn selected_outcome(option_id: &str) -> Value {
    json!({ "outcome": { "outcome": "selected", "optionId": option_id } })
}

/// Answer for a permission request abandoned by a cancelled turn.
pub fn cancelled_outcome() -> Value {
    json!({ "outcome": { "outcome": "cancelled" } })
}
