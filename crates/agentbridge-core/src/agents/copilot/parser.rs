//! ACP `session/update` and permission requests → [`AgentEvent`].
//!
//! Thought chunks are collected and surfaced as a single collapsed
//! thinking message once the agent moves on to something else, or when the
//! turn ends ([`CopilotParser::finish_turn`]).
//!
//! A tool call whose input names an `agent_type` is a sub-agent: it is
//! reported as a `Task` card carrying its tool call id, and tool calls that
//! follow until it completes are nested under it.

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::agents::event::{AgentEvent, ToolMeta};
use crate::agents::rpc::id_to_string;
use crate::agents::tool_input::count_lines;
use crate::approval::parse_command_prefixes;

use super::types::{
    text_of, tool_contents, PermissionOption, PermissionRequest, ServerMessage, SessionUpdate,
    ToolContent,
};

const REQUEST_PERMISSION: &str = "session/request_permission";

/// A permission prompt the adapter must answer.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPermission {
    pub id: Value,
    pub options: Vec<PermissionOption>,
}

#[derive(Debug, Default, PartialEq)]
pub struct CopilotLine {
    pub events: Vec<AgentEvent>,
    pub permission: Option<PendingPermission>,
    pub unsupported_request: Option<Value>,
}

#[derive(Debug, Default)]
pub struct CopilotParser {
    thought: String,
    active_task: Option<String>,
    /// tool call id → ACP kind, for calls not yet completed.
    open_calls: HashMap<String, String>,
}

impl CopilotParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse_line(&mut self, line: &str) -> CopilotLine {
        let message: ServerMessage = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(_) => return CopilotLine::default(),
        };

        match (message.id, message.method.as_str()) {
            (Some(id), REQUEST_PERMISSION) => self.permission_request(id, message.params),
            (Some(id), method) => {
                log::debug!("unsupported copilot request {method}");
                CopilotLine {
                    unsupported_request: Some(id),
                    ..CopilotLine::default()
                }
            }
            (None, "session/update") => {
                let raw = message.params.get("update").cloned().unwrap_or(message.params);
                match serde_json::from_value::<SessionUpdate>(raw) {
                    Ok(update) => CopilotLine {
                        events: self.session_update(update),
                        ..CopilotLine::default()
                    },
                    Err(err) => {
                        log::debug!("malformed session/update: {err}");
                        CopilotLine::default()
                    }
                }
            }
            _ => CopilotLine::default(),
        }
    }

    /// Pending thinking text of a finished turn, and a clean slate for the next.
    pub fn finish_turn(&mut self) -> Vec<AgentEvent> {
        self.active_task = None;
        self.open_calls.clear();
        self.take_thought().into_iter().collect()
    }

    fn take_thought(&mut self) -> Option<AgentEvent> {
        let thought = std::mem::take(&mut self.thought);
        (!thought.trim().is_empty()).then(|| AgentEvent::thinking(thought.trim()))
    }

    fn session_update(&mut self, update: SessionUpdate) -> Vec<AgentEvent> {
        if let SessionUpdate::AgentThoughtChunk { content } = &update {
            if let Some(text) = text_of(content) {
                self.thought.push_str(text);
            }
            return Vec::new();
        }

        let mut events: Vec<AgentEvent> = self.take_thought().into_iter().collect();
        match update {
            SessionUpdate::AgentMessageChunk { content } => {
                if let Some(text) = text_of(&content) {
                    events.push(AgentEvent::Text {
                        text: text.to_string(),
                    });
                }
            }
            SessionUpdate::ToolCall {
                tool_call_id,
                title,
                kind,
                status,
                raw_input,
            } => {
                let kind = kind.unwrap_or_else(|| "other".to_string());
                self.open_calls.insert(tool_call_id.clone(), kind.clone());
                if matches!(status.as_deref(), None | Some("pending") | Some("in_progress")) {
                    events.push(self.tool_call(tool_call_id, &kind, title.as_deref(), raw_input));
                }
            }
            SessionUpdate::ToolCallUpdate {
                tool_call_id,
                status,
                content,
                raw_output,
            } => {
                if matches!(status.as_deref(), Some("completed") | Some("failed")) {
                    events.extend(self.tool_call_done(&tool_call_id, &content, raw_output));
                }
            }
            SessionUpdate::Plan { entries } if !entries.is_empty() => {
                let steps = entries
                    .iter()
                    .enumerate()
                    .map(|(i, e)| format!("{}. [{}] {}", i + 1, e.status, e.content))
                    .collect::<Vec<_>>()
                    .join("\n");
                events.push(AgentEvent::message(format!("Plan:\n{steps}")));
            }
            _ => {}
        }
        events
    }

    fn tool_call(
        &mut self,
        tool_call_id: String,
        kind: &str,
        title: Option<&str>,
        raw_input: Option<Value>,
    ) -> AgentEvent {
        let mut input = raw_input.unwrap_or(Value::Null);

        if let Some(agent_type) = input.as_object_mut().and_then(|obj| obj.remove("agent_type")) {
            input["subagent_type"] = agent_type;
            self.active_task = Some(tool_call_id.clone());
            return AgentEvent::Message {
                content: card("Task", &input),
                tool_meta: Some(ToolMeta::new("Task")),
                parent_tool_use_id: None,
                tool_use_id: Some(tool_call_id),
                is_info: None,
            };
        }

        let name = tool_name(kind, title.unwrap_or("Tool"));
        AgentEvent::Message {
            content: card(&name, &input),
            tool_meta: Some(ToolMeta::new(name)),
            parent_tool_use_id: self.active_task.clone(),
            tool_use_id: None,
            is_info: None,
        }
    }

    fn tool_call_done(
        &mut self,
        tool_call_id: &str,
        content: &Value,
        raw_output: Option<Value>,
    ) -> Vec<AgentEvent> {
        let kind = self.open_calls.remove(tool_call_id);
        if self.active_task.as_deref() == Some(tool_call_id) {
            self.active_task = None;
        }
        // Read results are file contents; the card is enough.
        if kind.as_deref() == Some("read") {
            return Vec::new();
        }

        let mut events: Vec<AgentEvent> = tool_contents(content)
            .into_iter()
            .filter_map(content_event)
            .collect();
        if events.is_empty() {
            if let Some(mut output) = raw_output.filter(|o| !o.is_null()) {
                if let Some(obj) = output.as_object_mut() {
                    obj.remove("detailedContent");
                }
                let text = match &output {
                    Value::String(s) => s.clone(),
                    other => serde_json::to_string_pretty(other).unwrap_or_default(),
                };
                if !text.is_empty() && text != "{}" {
                    events.push(AgentEvent::BashOutput { text });
                }
            }
        }
        events
    }

    fn permission_request(&mut self, id: Value, params: Value) -> CopilotLine {
        let request: PermissionRequest = serde_json::from_value(params).unwrap_or_default();
        let call = request.tool_call;
        let name = tool_name(
            call.kind.as_deref().unwrap_or("other"),
            call.title.as_deref().unwrap_or("Permission"),
        );
        let input = call.raw_input.unwrap_or_else(|| json!({}));
        let command = input.get("command").and_then(Value::as_str);

        let display_input = match (name.as_str(), command) {
            ("Bash", Some(command)) => command.to_string(),
            _ => ["url", "path"]
                .iter()
                .find_map(|key| input.get(*key).and_then(Value::as_str))
                .map(str::to_string)
                .unwrap_or_else(|| serde_json::to_string_pretty(&input).unwrap_or_default()),
        };
        let command_prefixes = match (name.as_str(), command) {
            ("Bash", Some(command)) => Some(parse_command_prefixes(command)),
            _ => None,
        };

        let mut events: Vec<AgentEvent> = self.take_thought().into_iter().collect();
        events.push(AgentEvent::ToolApproval {
            request_id: id_to_string(&id),
            name,
            input,
            display_input,
            command_prefixes,
            auto_approved: false,
        });
        CopilotLine {
            events,
            permission: Some(PendingPermission {
                id,
                options: request.options,
            }),
            unsupported_request: None,
        }
    }
}

fn content_event(item: ToolContent) -> Option<AgentEvent> {
    match item {
        ToolContent::Content { content } => text_of(&content).map(|text| AgentEvent::BashOutput {
            text: text.to_string(),
        }),
        ToolContent::Text { text } | ToolContent::TerminalOutput { output: text } => {
            Some(AgentEvent::BashOutput { text })
        }
        ToolContent::Diff {
            path,
            old_text,
            new_text,
        } => {
            let old_text = old_text.unwrap_or_default();
            let meta = ToolMeta::new("Edit").with_lines(count_lines(&new_text), count_lines(&old_text));
            let input = json!({ "file_path": path, "old_string": old_text, "new_string": new_text });
            Some(AgentEvent::tool_message(card("Edit", &input), meta))
        }
        ToolContent::Other => None,
    }
}

fn card(name: &str, input: &Value) -> String {
    match input {
        Value::Null => format!("[{name}]"),
        Value::Object(obj) if obj.is_empty() => format!("[{name}]"),
        _ => format!(
            "[{name}]\n{}",
            serde_json::to_string_pretty(input).unwrap_or_default()
        ),
    }
}

/// ACP tool kinds in the vocabulary the UI already knows.
fn tool_name(kind: &str, title: &str) -> String {
    let name = match kind {
        "execute" => "Bash",
        "edit" => "Edit",
        "read" => "Read",
        "search" => "Grep",
        "fetch" => "WebFetch",
        "think" => "Think",
        _ => title,
    };
    name.to_string()
}
