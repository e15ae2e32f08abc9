//! Gemini stream-json → [`AgentEvent`].
//!
//! One parser lives for one turn's process. The session id from `init` is
//! reported once per value, so a resumed session that echoes the known id
//! stays quiet.

use serde_json::Value;

use crate::agents::event::{AgentEvent, ToolMeta};
use crate::agents::line_buffer::LineBuffer;
use crate::agents::tool_input::count_lines;

use super::types::GeminiEvent;

#[derive(Debug, Default)]
pub struct GeminiParser {
    session_id: Option<String>,
    lines: LineBuffer,
    last_tool: Option<String>,
}

/// Events of a fed chunk, and whether any line decoded at all.
#[derive(Debug, Default, PartialEq)]
pub struct GeminiChunk {
    pub events: Vec<AgentEvent>,
    pub decoded_lines: usize,
}

impl GeminiParser {
    pub fn new(session_id: Option<String>) -> Self {
        Self {
            session_id,
            ..Self::default()
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn feed(&mut self, chunk: &str) -> GeminiChunk {
        let mut out = GeminiChunk::default();
        for line in self.lines.push(chunk) {
            self.parse_into(&line, &mut out);
        }
        out
    }

    pub fn flush(&mut self) -> GeminiChunk {
        let mut out = GeminiChunk::default();
        if let Some(rest) = self.lines.finish() {
            self.parse_into(&rest, &mut out);
        }
        out
    }

    fn parse_into(&mut self, line: &str, out: &mut GeminiChunk) {
        match serde_json::from_str::<GeminiEvent>(line) {
            Ok(event) => {
                out.decoded_lines += 1;
                out.events.extend(self.translate(event));
            }
            Err(_) => log::debug!("gemini stdout noise: {line}"),
        }
    }

    fn translate(&mut self, event: GeminiEvent) -> Vec<AgentEvent> {
        match event {
            GeminiEvent::Init {
                session_id: Some(id),
                ..
            } if self.session_id.as_deref() != Some(id.as_str()) => {
                self.session_id = Some(id.clone());
                vec![AgentEvent::SessionId { session_id: id }]
            }
            GeminiEvent::Message {
                role,
                content,
                delta,
            } if role.as_deref() == Some("assistant") && !content.is_empty() => {
                if delta {
                    vec![AgentEvent::Text { text: content }]
                } else {
                    vec![AgentEvent::message(content)]
                }
            }
            GeminiEvent::ToolUse {
                tool_name,
                parameters,
                ..
            } => {
                let name = normalize_tool_name(&tool_name);
                self.last_tool = Some(name.clone());
                vec![tool_card(&name, &parameters)]
            }
            GeminiEvent::ToolResult {
                status,
                output,
                error,
                ..
            } => {
                // File contents of a read are not worth echoing.
                if self.last_tool.take().as_deref() == Some("Read") {
                    return Vec::new();
                }
                match (status.as_deref(), output, error) {
                    (Some("error"), _, Some(error)) => {
                        vec![AgentEvent::message(format!("Error: {}", error.message()))]
                    }
                    (_, Some(output), _) if !output.is_empty() => {
                        vec![AgentEvent::BashOutput { text: output }]
                    }
                    _ => Vec::new(),
                }
            }
            GeminiEvent::Error { message, .. } => {
                let message = message.unwrap_or_else(|| "Unknown error".to_string());
                vec![AgentEvent::info(format!("Error: {message}"))]
            }
            GeminiEvent::Result {
                status: Some(status),
                error,
            } if status == "error" => {
                let message = error
                    .map(|e| e.message().to_string())
                    .unwrap_or_else(|| "Gemini reported an error".to_string());
                vec![AgentEvent::info(message)]
            }
            _ => Vec::new(),
        }
    }
}

fn tool_card(name: &str, parameters: &Value) -> AgentEvent {
    let mut meta = ToolMeta::new(name);
    if name == "Edit" || name == "Write" {
        let text = |key: &str| parameters.get(key).and_then(Value::as_str).unwrap_or_default();
        let new_text = match text("new_string") {
            "" => text("content"),
            s => s,
        };
        meta = meta.with_lines(count_lines(new_text), count_lines(text("old_string")));
    }

    let content = match parameters {
        Value::Object(obj) if !obj.is_empty() => format!(
            "[{name}]\n{}",
            serde_json::to_string_pretty(parameters).unwrap_or_default()
        ),
        _ => format!("[{name}]"),
    };
    AgentEvent::tool_message(content, meta)
}

/// Gemini tool names in the vocabulary the UI already knows.
pub fn normalize_tool_name(gemini_name: &str) -> String {
    let known = match gemini_name.to_ascii_lowercase().as_str() {
        "shell" | "run_shell_command" => Some("Bash"),
        "write_file" => Some("Write"),
        "edit_file" | "replace" => Some("Edit"),
        "read_file" | "read_many_files" => Some("Read"),
        "search" | "grep" | "search_file_content" => Some("Grep"),
        "glob" => Some("Glob"),
        "fetch" | "web_fetch" => Some("WebFetch"),
        "list_directory" => Some("ListDir"),
        _ => None,
    };
    match known {
        Some(name) => name.to_string(),
        None => {
            let mut chars = gemini_name.chars();
            chars
                .next()
                .map(|first| first.to_uppercase().chain(chars).collect())
                .unwrap_or_default()
        }
    }
}
