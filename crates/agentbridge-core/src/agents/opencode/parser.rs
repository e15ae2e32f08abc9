//! OpenCode response parts → [`AgentEvent`].
//!
//! A prompt call returns the whole turn at once, so there is no buffering:
//! each part maps to zero or more events, in order.

use serde_json::Value;

use crate::agents::event::AgentEvent;
use crate::agents::tool_input::tool_meta_for;

use super::types::Part;

pub fn parse_parts(parts: &[Value]) -> Vec<AgentEvent> {
    parts
        .iter()
        .filter_map(|raw| match serde_json::from_value::<Part>(raw.clone()) {
            Ok(part) => Some(part),
            Err(err) => {
                log::debug!("skipping unreadable opencode part: {err}");
                None
            }
        })
        .flat_map(translate_part)
        .collect()
}

fn translate_part(part: Part) -> Vec<AgentEvent> {
    match part {
        Part::Text { text, synthetic } if !synthetic && !text.trim().is_empty() => {
            vec![AgentEvent::message(text.trim())]
        }
        Part::Reasoning { text } if !text.trim().is_empty() => {
            vec![AgentEvent::thinking(text.trim())]
        }
        Part::Tool { tool, state, .. } => {
            let output = match (state.status.as_deref(), state.error) {
                (Some("error"), Some(error)) => Some(Value::String(format!("Error: {error}"))),
                _ => state.output,
            };
            tool_events(&tool, &state.input, output)
        }
        Part::ToolInvocation { tool } => tool_events(&tool.name, &tool.input, tool.output),
        _ => Vec::new(),
    }
}

fn tool_events(raw_name: &str, input: &Value, output: Option<Value>) -> Vec<AgentEvent> {
    let name = normalize_tool_name(raw_name);
    let input = match input {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    let pretty = serde_json::to_string_pretty(&input).unwrap_or_else(|_| "{}".to_string());
    let meta = tool_meta_for(&name, &input);
    let mut events = vec![AgentEvent::tool_message(format!("[{name}]\n{pretty}"), meta)];

    if name != "Read" {
        let text = match output {
            Some(Value::String(s)) => s,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        if !text.trim().is_empty() {
            events.push(AgentEvent::BashOutput { text });
        }
    }
    events
}

/// OpenCode's lowercase tool ids in the vocabulary the UI already knows.
fn normalize_tool_name(name: &str) -> String {
    let known = match name.to_ascii_lowercase().as_str() {
        "bash" | "shell" => "Bash",
        "write" => "Write",
        "edit" | "patch" => "Edit",
        "read" => "Read",
        "grep" | "search" => "Grep",
        "glob" => "Glob",
        "list" => "ListDir",
        "webfetch" | "fetch" => "WebFetch",
        "todowrite" => "TodoWrite",
        "task" => "Task",
        _ => "",
    };
    if !known.is_empty() {
        return known.to_string();
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
