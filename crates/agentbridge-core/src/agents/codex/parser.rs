//! Codex notifications and server requests → [`AgentEvent`].
//!
//! Lines are fed one at a time, after the correlator has had its chance at
//! them. Approval requests become `toolApproval` events whose request id is
//! the JSON-RPC id rendered as a string; the adapter answers them later.
//! Server requests this layer does not understand are handed back in
//! [`CodexLine::unsupported_request`] so the adapter can reject them instead
//! of leaving the server waiting.

use serde_json::{json, Value};

use crate::agents::event::{AgentEvent, ToolMeta};
use crate::agents::rpc::id_to_string;
use crate::approval::parse_command_prefixes;

use super::types::{CodexItem, ServerMessage};

const COMMAND_APPROVAL: &str = "item/commandExecution/requestApproval";
const FILE_CHANGE_APPROVAL: &str = "item/fileChange/requestApproval";
const USER_INPUT_REQUEST: &str = "item/tool/requestUserInput";

#[derive(Debug, Default, PartialEq)]
pub struct CodexLine {
    pub events: Vec<AgentEvent>,
    /// Id of a server request nobody will answer.
    pub unsupported_request: Option<Value>,
}

impl From<Vec<AgentEvent>> for CodexLine {
    fn from(events: Vec<AgentEvent>) -> Self {
        Self {
            events,
            unsupported_request: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct CodexParser {
    in_command_execution: bool,
}

impl CodexParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Between `item/started` and `item/completed` of a shell command.
    pub fn in_command_execution(&self) -> bool {
        self.in_command_execution
    }

    pub fn parse_line(&mut self, line: &str) -> CodexLine {
        let message: ServerMessage = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(_) => return CodexLine::default(),
        };
        match message.id {
            Some(id) => server_request(id, &message.method, message.params),
            None => self.notification(&message.method, &message.params).into(),
        }
    }

    fn notification(&mut self, method: &str, params: &Value) -> Vec<AgentEvent> {
        let delta = || params.get("delta").and_then(Value::as_str).map(str::to_string);
        match method {
            "item/agentMessage/delta" | "item/reasoning/summaryTextDelta" => delta()
                .map(|text| vec![AgentEvent::Text { text }])
                .unwrap_or_default(),
            "item/commandExecution/outputDelta" => delta()
                .map(|text| vec![AgentEvent::BashOutput { text }])
                .unwrap_or_default(),
            "item/started" => match item(params) {
                Some(item) => self.item_started(item),
                None => Vec::new(),
            },
            "item/completed" => match item(params) {
                Some(item) => self.item_completed(item),
                None => Vec::new(),
            },
            "turn/completed" => vec![AgentEvent::TurnComplete],
            "error" => {
                let message = params
                    .get("message")
                    .or_else(|| params.pointer("/error/message"))
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown error");
                vec![AgentEvent::info(format!("Error: {message}"))]
            }
            other => {
                log::trace!("codex notification ignored: {other}");
                Vec::new()
            }
        }
    }

    fn item_started(&mut self, item: CodexItem) -> Vec<AgentEvent> {
        match item {
            CodexItem::CommandExecution { command } => {
                self.in_command_execution = true;
                vec![tool_card("Bash", &json!({ "command": command }), ToolMeta::new("Bash"))]
            }
            CodexItem::FileChange { .. } => item
                .file_diffs()
                .into_iter()
                .map(|(path, diff)| {
                    let (added, removed) = diff_line_counts(&diff);
                    tool_card(
                        "Edit",
                        &json!({ "file_path": path, "diff": diff }),
                        ToolMeta::new("Edit").with_lines(added, removed),
                    )
                })
                .collect(),
            CodexItem::McpToolCall {
                tool_name,
                arguments,
            } => {
                let name = tool_name.unwrap_or_else(|| "Tool".to_string());
                let meta = ToolMeta::new(name.clone());
                vec![tool_card(&name, &arguments, meta)]
            }
            _ => Vec::new(),
        }
    }

    fn item_completed(&mut self, item: CodexItem) -> Vec<AgentEvent> {
        match item {
            CodexItem::CommandExecution { .. } => {
                self.in_command_execution = false;
                Vec::new()
            }
            CodexItem::AgentMessage { text } if !text.trim().is_empty() => {
                vec![AgentEvent::message(text)]
            }
            _ => Vec::new(),
        }
    }
}

fn item(params: &Value) -> Option<CodexItem> {
    let raw = params.get("item")?;
    match serde_json::from_value(raw.clone()) {
        Ok(item) => Some(item),
        Err(err) => {
            log::debug!("malformed codex item ({err}): {raw}");
            None
        }
    }
}

fn tool_card(name: &str, input: &Value, meta: ToolMeta) -> AgentEvent {
    let content = match serde_json::to_string_pretty(input) {
        Ok(pretty) if !input.is_null() => format!("[{name}]\n{pretty}"),
        _ => format!("[{name}]"),
    };
    AgentEvent::tool_message(content, meta)
}

/// `(added, removed)` lines of a unified diff, headers excluded.
fn diff_line_counts(diff: &str) -> (u32, u32) {
    diff.lines().fold((0, 0), |(added, removed), line| {
        if line.starts_with("+++") || line.starts_with("---") {
            (added, removed)
        } else if line.starts_with('+') {
            (added + 1, removed)
        } else if line.starts_with('-') {
            (added, removed + 1)
        } else {
            (added, removed)
        }
    })
}

fn server_request(id: Value, method: &str, params: Value) -> CodexLine {
    let request_id = id_to_string(&id);
    let pretty = |params: &Value| serde_json::to_string_pretty(params).unwrap_or_default();

    let event = match method {
        COMMAND_APPROVAL => {
            let command = params
                .get("command")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            AgentEvent::ToolApproval {
                request_id,
                name: "Bash".to_string(),
                command_prefixes: Some(parse_command_prefixes(&command)),
                display_input: command,
                input: params,
                auto_approved: false,
            }
        }
        FILE_CHANGE_APPROVAL | USER_INPUT_REQUEST => AgentEvent::ToolApproval {
            request_id,
            name: if method == FILE_CHANGE_APPROVAL { "Edit" } else { "UserInput" }.to_string(),
            display_input: pretty(&params),
            input: params,
            command_prefixes: None,
            auto_approved: false,
        },
        _ => {
            return CodexLine {
                events: Vec::new(),
                unsupported_request: Some(id),
            }
        }
    };
    vec![event].into()
}
