//! Typed parsing of tool-call inputs.
//!
//! Agents send tool inputs as free-form JSON. The few tools whose inputs we
//! interpret (shell commands, file edits, sub-agent tasks) are decoded into
//! [`ToolInput`] through serde, so a malformed input is a [`ToolInputError`]
//! instead of a silently missing line count. Field names are accepted in both
//! the snake_case (Claude, Gemini) and camelCase (OpenCode) spellings.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::event::ToolMeta;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolInput {
    Bash {
        command: String,
        description: Option<String>,
    },
    Edit {
        file_path: String,
        old_string: String,
        new_string: String,
    },
    Write {
        file_path: String,
        content: String,
    },
    Task {
        description: Option<String>,
        prompt: Option<String>,
        subagent_type: Option<String>,
    },
    /// A tool whose input we pass through untouched.
    Other,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid {tool} input: {reason}")]
pub struct ToolInputError {
    pub tool: String,
    pub reason: String,
}

#[derive(Deserialize)]
struct BashArgs {
    #[serde(alias = "cmd")]
    command: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
struct EditArgs {
    #[serde(alias = "filePath", alias = "path")]
    file_path: String,
    #[serde(alias = "oldString", alias = "old_str")]
    old_string: String,
    #[serde(alias = "newString", alias = "new_str")]
    new_string: String,
}

#[derive(Deserialize)]
struct WriteArgs {
    #[serde(alias = "filePath", alias = "path")]
    file_path: String,
    content: String,
}

#[derive(Deserialize)]
struct TaskArgs {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default, alias = "subagentType", alias = "agent_type")]
    subagent_type: Option<String>,
}

fn decode<T: for<'de> Deserialize<'de>>(tool: &str, input: &Value) -> Result<T, ToolInputError> {
    T::deserialize(input).map_err(|err| ToolInputError {
        tool: tool.to_string(),
        reason: err.to_string(),
    })
}

/// Decode `input` for a tool with a canonical name (`Bash`, `Edit`, `Write`,
/// `Task`). Any other tool yields [`ToolInput::Other`].
pub fn parse_tool_input(tool: &str, input: &Value) -> Result<ToolInput, ToolInputError> {
    Ok(match tool {
        "Bash" => {
            let args: BashArgs = decode(tool, input)?;
            ToolInput::Bash {
                command: args.command,
                description: args.description,
            }
        }
        "Edit" => {
            let args: EditArgs = decode(tool, input)?;
            ToolInput::Edit {
                file_path: args.file_path,
                old_string: args.old_string,
                new_string: args.new_string,
            }
        }
        "Write" => {
            let args: WriteArgs = decode(tool, input)?;
            ToolInput::Write {
                file_path: args.file_path,
                content: args.content,
            }
        }
        "Task" => {
            let args: TaskArgs = decode(tool, input)?;
            ToolInput::Task {
                description: args.description,
                prompt: args.prompt,
                subagent_type: args.subagent_type,
            }
        }
        _ => ToolInput::Other,
    })
}

/// Lines in a text blob; the empty string has none.
pub fn count_lines(text: &str) -> u32 {
    if text.is_empty() {
        0
    } else {
        text.split('\n').count() as u32
    }
}

impl ToolInput {
    /// `(added, removed)` for edit-style tools.
    pub fn line_changes(&self) -> Option<(u32, u32)> {
        match self {
            ToolInput::Edit {
                old_string,
                new_string,
                ..
            } => Some((count_lines(new_string), count_lines(old_string))),
            ToolInput::Write { content, .. } => Some((count_lines(content), 0)),
            _ => None,
        }
    }

    pub fn command(&self) -> Option<&str> {
        match self {
            ToolInput::Bash { command, .. } => Some(command),
            _ => None,
        }
    }
}

/// Display metadata for a tool call. Malformed input still produces a
/// message, just without line counts; the problem is logged.
pub fn tool_meta_for(tool: &str, input: &Value) -> ToolMeta {
    let meta = ToolMeta::new(tool);
    match parse_tool_input(tool, input) {
        Ok(parsed) => match parsed.line_changes() {
            Some((added, removed)) => meta.with_lines(added, removed),
            None => meta,
        },
        Err(err) => {
            log::debug!("{err}");
            meta
        }
    }
}
