//! Claude stream-json to [`AgentEvent`] translation.
//!
//! # Buffering
//!
//! Stdout arrives in arbitrary chunks. [`ClaudeParser::feed`] keeps the
//! unterminated tail of the last chunk and only parses complete lines, so
//! `{"type":"resu` followed by `lt"}\n` produces one `result`.
//! [`ClaudeParser::flush`] parses whatever is left when the process closes.
//!
//! # Translation
//!
//! | Claude                               | AgentEvent                          |
//! |--------------------------------------|-------------------------------------|
//! | first `session_id` seen              | `SessionId`                         |
//! | assistant `thinking` block           | `Message` with `Thinking` tool meta |
//! | assistant `text` block               | `Message`                           |
//! | assistant `tool_use` block           | `Message` `[Tool]\n{input}`         |
//! | `content_block_start` / `_delta`     | `Text`                              |
//! | `result`                             | `TurnComplete`                      |
//! | `control_request` `can_use_tool`     | `ToolApproval` / `Question` / `PlanApproval` |
//!
//! Unparseable lines are dropped; the CLI prints the occasional non-JSON
//! diagnostic on stdout.

use serde_json::Value;

use crate::agents::event::AgentEvent;
use crate::agents::line_buffer::LineBuffer;
use crate::agents::tool_input::{parse_tool_input, tool_meta_for, ToolInput};
use crate::approval::parse_command_prefixes;

use super::types::{
    AskUserQuestionInput, ClaudeMessage, ContentBlock, ControlRequest, ExitPlanModeInput,
};

/// Tools answered through the question / plan flows instead of a tool card.
const INTERACTIVE_TOOLS: [&str; 2] = ["AskUserQuestion", "ExitPlanMode"];

#[derive(Debug, Default)]
pub struct ClaudeParser {
    session_id: Option<String>,
    lines: LineBuffer,
}

impl ClaudeParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Seed the id of a resumed session so it is not reported again.
    pub fn set_session_id(&mut self, session_id: Option<String>) {
        self.session_id = session_id;
    }

    pub fn feed(&mut self, chunk: &str) -> Vec<AgentEvent> {
        self.lines
            .push(chunk)
            .iter()
            .flat_map(|line| self.parse_line(line))
            .collect()
    }

    pub fn flush(&mut self) -> Vec<AgentEvent> {
        match self.lines.finish() {
            Some(rest) => self.parse_line(&rest),
            None => Vec::new(),
        }
    }

    fn parse_line(&mut self, line: &str) -> Vec<AgentEvent> {
        let message: ClaudeMessage = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(err) => {
                log::debug!("ignoring unparseable claude line ({err}): {line}");
                return Vec::new();
            }
        };

        let mut events = Vec::new();
        if let Some(id) = message.session_id() {
            if self.session_id.as_deref() != Some(id) {
                self.session_id = Some(id.to_string());
                events.push(AgentEvent::SessionId {
                    session_id: id.to_string(),
                });
            }
        }
        events.extend(translate(message));
        events
    }
}

fn translate(message: ClaudeMessage) -> Vec<AgentEvent> {
    match message {
        ClaudeMessage::Assistant {
            message,
            parent_tool_use_id,
            ..
        } => message
            .content
            .into_iter()
            .filter_map(|block| translate_block(block, parent_tool_use_id.as_deref()))
            .collect(),

        ClaudeMessage::ContentBlockStart {
            content_block: ContentBlock::ToolUse { name, .. },
        } => vec![AgentEvent::Text {
            text: format!("\n[{name}] ..."),
        }],

        ClaudeMessage::ContentBlockDelta { delta } => delta
            .text
            .map(|text| vec![AgentEvent::Text { text }])
            .unwrap_or_default(),

        ClaudeMessage::Result {
            is_error, result, ..
        } => {
            let mut events = Vec::new();
            if is_error {
                if let Some(text) = result.filter(|r| !r.trim().is_empty()) {
                    events.push(AgentEvent::info(text));
                }
            }
            events.push(AgentEvent::TurnComplete);
            events
        }

        ClaudeMessage::ControlRequest {
            request_id,
            request,
        } if request.subtype == "can_use_tool" => translate_permission(request_id, request)
            .into_iter()
            .collect(),

        _ => Vec::new(),
    }
}

fn with_parent(event: AgentEvent, parent: Option<&str>) -> AgentEvent {
    match event {
        AgentEvent::Message {
            content,
            tool_meta,
            tool_use_id,
            is_info,
            ..
        } => AgentEvent::Message {
            content,
            tool_meta,
            parent_tool_use_id: parent.map(str::to_string),
            tool_use_id,
            is_info,
        },
        other => other,
    }
}

fn translate_block(block: ContentBlock, parent: Option<&str>) -> Option<AgentEvent> {
    let event = match block {
        ContentBlock::Thinking { thinking } if !thinking.trim().is_empty() => {
            AgentEvent::thinking(thinking)
        }
        ContentBlock::Text { text } if !text.trim().is_empty() => {
            AgentEvent::message(text.trim())
        }
        ContentBlock::ToolUse { id, name, input } => {
            if INTERACTIVE_TOOLS.contains(&name.as_str()) {
                return None;
            }
            let content = match serde_json::to_string_pretty(&input) {
                Ok(pretty) if !input.is_null() => format!("[{name}]\n{pretty}"),
                _ => format!("[{name}]"),
            };
            let meta = tool_meta_for(&name, &input);
            let tool_use_id = (name == "Task").then_some(id).flatten();
            AgentEvent::Message {
                content,
                tool_meta: Some(meta),
                parent_tool_use_id: None,
                tool_use_id,
                is_info: None,
            }
        }
        _ => return None,
    };
    Some(with_parent(event, parent))
}

fn translate_permission(request_id: String, request: ControlRequest) -> Option<AgentEvent> {
    let tool_name = request.tool_name.unwrap_or_else(|| "Unknown".to_string());
    let input = if request.input.is_null() {
        Value::Object(Default::default())
    } else {
        request.input
    };

    match tool_name.as_str() {
        "AskUserQuestion" => match serde_json::from_value::<AskUserQuestionInput>(input.clone()) {
            Ok(parsed) => Some(AgentEvent::Question {
                request_id,
                questions: parsed.questions,
                raw_input: input,
            }),
            Err(err) => {
                log::warn!("malformed AskUserQuestion input: {err}");
                None
            }
        },
        "ExitPlanMode" => {
            let plan = serde_json::from_value::<ExitPlanModeInput>(input)
                .ok()
                .and_then(|p| p.plan)
                .unwrap_or_default();
            Some(AgentEvent::PlanApproval {
                request_id,
                content: plan,
            })
        }
        _ => {
            let display_input = match input.as_object() {
                Some(obj) if !obj.is_empty() => {
                    serde_json::to_string_pretty(&input).unwrap_or_default()
                }
                _ => String::new(),
            };
            let command_prefixes = match parse_tool_input(&tool_name, &input) {
                Ok(ToolInput::Bash { command, .. }) => Some(parse_command_prefixes(&command)),
                _ => None,
            };
            Some(AgentEvent::ToolApproval {
                request_id,
                name: tool_name,
                input,
                display_input,
                command_prefixes,
                auto_approved: false,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feed_line(parser: &mut ClaudeParser, line: &str) -> Vec<AgentEvent> {
        parser.feed(&format!("{line}\n"))
    }

    mod buffering {
        use super::*;

        #[test]
        fn split_result_line_yields_one_turn_complete() {
            let mut parser = ClaudeParser::new();
            assert!(parser.feed(r#"{"type":"resu"#).is_empty());
            let events = parser.feed("lt\"}\n");
            assert_eq!(events, vec![AgentEvent::TurnComplete]);
        }

        #[test]
        fn flush_parses_unterminated_tail() {
            let mut parser = ClaudeParser::new();
            assert!(parser.feed(r#"{"type":"result"}"#).is_empty());
            assert_eq!(parser.flush(), vec![AgentEvent::TurnComplete]);
            assert!(parser.flush().is_empty());
        }

        #[test]
        fn garbage_lines_are_ignored() {
            let mut parser = ClaudeParser::new();
            assert!(feed_line(&mut parser, "Warning: something").is_empty());
            assert!(feed_line(&mut parser, r#"{"no_type":1}"#).is_empty());
        }
    }

    mod session {
        use super::*;

        #[test]
        fn first_session_id_is_reported_once() {
            let mut parser = ClaudeParser::new();
            let first = feed_line(&mut parser, r#"{"type":"system","subtype":"init","session_id":"s-1"}"#);
            let second = feed_line(
                &mut parser,
                r#"{"type":"assistant","session_id":"s-1","message":{"content":[]}}"#,
            );
            assert_eq!(
                first,
                vec![AgentEvent::SessionId {
                    session_id: "s-1".to_string()
                }]
            );
            assert!(second.is_empty());
            assert_eq!(parser.session_id(), Some("s-1"));
        }

        #[test]
        fn seeded_session_is_not_reported() {
            let mut parser = ClaudeParser::new();
            parser.set_session_id(Some("s-1".to_string()));
            assert!(feed_line(&mut parser, r#"{"type":"system","session_id":"s-1"}"#).is_empty());
        }
    }

    mod assistant {
        use super::*;

        #[test]
        fn thinking_becomes_collapsed_message() {
            let mut parser = ClaudeParser::new();
            let events = feed_line(
                &mut parser,
                r#"{"type":"assistant","message":{"content":[{"type":"thinking","thinking":"Let me look"}]}}"#,
            );
            assert_eq!(events, vec![AgentEvent::thinking("Let me look")]);
        }

        #[test]
        fn text_is_trimmed_and_blank_text_skipped() {
            let mut parser = ClaudeParser::new();
            let events = feed_line(
                &mut parser,
                r#"{"type":"assistant","message":{"content":[{"type":"text","text":"  Done.\n"},{"type":"text","text":"  "}]}}"#,
            );
            assert_eq!(events, vec![AgentEvent::message("Done.")]);
        }

        #[test]
        fn edit_tool_use_counts_lines() {
            let mut parser = ClaudeParser::new();
            let events = feed_line(
                &mut parser,
                r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t1","name":"Edit","input":{"file_path":"a.rs","old_string":"a","new_string":"a\nb\nc"}}]}}"#,
            );
            let AgentEvent::Message {
                content,
                tool_meta: Some(meta),
                tool_use_id,
                ..
            } = &events[0]
            else {
                panic!("expected tool message, got {events:?}");
            };
            assert!(content.starts_with("[Edit]\n"));
            assert_eq!((meta.lines_added, meta.lines_removed), (Some(3), Some(1)));
            assert!(tool_use_id.is_none());
        }

        #[test]
        fn task_carries_tool_use_id_and_children_carry_parent() {
            let mut parser = ClaudeParser::new();
            let spawn = feed_line(
                &mut parser,
                r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"task-1","name":"Task","input":{"description":"explore","prompt":"look around"}}]}}"#,
            );
            let child = feed_line(
                &mut parser,
                r#"{"type":"assistant","parent_tool_use_id":"task-1","message":{"content":[{"type":"tool_use","id":"t2","name":"Read","input":{"file_path":"x"}}]}}"#,
            );
            assert!(matches!(
                &spawn[0],
                AgentEvent::Message { tool_use_id: Some(id), parent_tool_use_id: None, .. } if id == "task-1"
            ));
            assert!(matches!(
                &child[0],
                AgentEvent::Message { parent_tool_use_id: Some(id), .. } if id == "task-1"
            ));
        }

        #[test]
        fn interactive_tool_uses_are_not_cards() {
            let mut parser = ClaudeParser::new();
            let events = feed_line(
                &mut parser,
                r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"q","name":"AskUserQuestion","input":{}},{"type":"tool_use","id":"p","name":"ExitPlanMode","input":{}}]}}"#,
            );
            assert!(events.is_empty());
        }
    }

    mod streaming {
        use super::*;

        #[test]
        fn block_start_and_delta_become_text() {
            let mut parser = ClaudeParser::new();
            let start = feed_line(
                &mut parser,
                r#"{"type":"content_block_start","content_block":{"type":"tool_use","name":"Bash","id":"t"}}"#,
            );
            let delta = feed_line(
                &mut parser,
                r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"abc"}}"#,
            );
            assert_eq!(
                start,
                vec![AgentEvent::Text {
                    text: "\n[Bash] ...".to_string()
                }]
            );
            assert_eq!(
                delta,
                vec![AgentEvent::Text {
                    text: "abc".to_string()
                }]
            );
        }

        #[test]
        fn error_result_surfaces_info() {
            let mut parser = ClaudeParser::new();
            let events = feed_line(
                &mut parser,
                r#"{"type":"result","is_error":true,"result":"Credit balance too low"}"#,
            );
            assert_eq!(
                events,
                vec![
                    AgentEvent::info("Credit balance too low"),
                    AgentEvent::TurnComplete
                ]
            );
        }
    }

    mod permissions {
        use super::*;

        #[test]
        fn bash_approval_has_prefixes() {
            let mut parser = ClaudeParser::new();
            let events = feed_line(
                &mut parser,
                r#"{"type":"control_request","request_id":"req-1","request":{"subtype":"can_use_tool","tool_name":"Bash","input":{"command":"git status && npm test"}}}"#,
            );
            let AgentEvent::ToolApproval {
                request_id,
                name,
                display_input,
                command_prefixes,
                auto_approved,
                ..
            } = &events[0]
            else {
                panic!("expected approval");
            };
            assert_eq!(request_id, "req-1");
            assert_eq!(name, "Bash");
            assert!(display_input.contains("git status"));
            assert_eq!(
                command_prefixes.as_deref(),
                Some(&["git status".to_string(), "npm test".to_string()][..])
            );
            assert!(!auto_approved);
        }

        #[test]
        fn question_request() {
            let mut parser = ClaudeParser::new();
            let events = feed_line(
                &mut parser,
                r#"{"type":"control_request","request_id":"req-2","request":{"subtype":"can_use_tool","tool_name":"AskUserQuestion","input":{"questions":[{"question":"Which?","header":"H","options":[{"label":"A","description":"a"}],"multiSelect":false}]}}}"#,
            );
            assert!(matches!(
                &events[0],
                AgentEvent::Question { request_id, questions, .. } if request_id == "req-2" && questions.len() == 1
            ));
        }

        #[test]
        fn plan_request() {
            let mut parser = ClaudeParser::new();
            let events = feed_line(
                &mut parser,
                r#"{"type":"control_request","request_id":"req-3","request":{"subtype":"can_use_tool","tool_name":"ExitPlanMode","input":{"plan":"1. Do it"}}}"#,
            );
            assert_eq!(
                events,
                vec![AgentEvent::PlanApproval {
                    request_id: "req-3".to_string(),
                    content: "1. Do it".to_string()
                }]
            );
        }

        #[test]
        fn missing_input_becomes_empty_object() {
            let mut parser = ClaudeParser::new();
            let events = feed_line(
                &mut parser,
                r#"{"type":"control_request","request_id":"req-4","request":{"subtype":"can_use_tool","tool_name":"WebSearch"}}"#,
            );
            assert!(matches!(
                &events[0],
                AgentEvent::ToolApproval { input, display_input, command_prefixes: None, .. }
                    if *input == json!({}) && display_input.is_empty()
            ));
        }

        #[test]
        fn other_control_subtypes_are_ignored() {
            let mut parser = ClaudeParser::new();
            assert!(feed_line(
                &mut parser,
                r#"{"type":"control_request","request_id":"r","request":{"subtype":"hook_callback"}}"#
            )
            .is_empty());
        }
    }
}
