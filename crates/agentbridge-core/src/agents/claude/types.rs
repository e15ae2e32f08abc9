//! Claude stream-json messages.
//!
//! Inbound lines are decoded into [`ClaudeMessage`], tagged by `type`.
//! Message types we do not act on decode to [`ClaudeMessage::Other`] rather
//! than failing, since the CLI adds new ones regularly.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::agents::event::QuestionItem;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeMessage {
    System {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    Assistant {
        message: AssistantMessage,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        parent_tool_use_id: Option<String>,
    },
    User {
        #[serde(default)]
        session_id: Option<String>,
    },
    ContentBlockStart {
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        delta: Delta,
    },
    Result {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        result: Option<String>,
    },
    ControlRequest {
        request_id: String,
        request: ControlRequest,
    },
    #[serde(other)]
    Other,
}

impl ClaudeMessage {
    pub fn session_id(&self) -> Option<&str> {
        match self {
            ClaudeMessage::System { session_id, .. }
            | ClaudeMessage::Assistant { session_id, .. }
            | ClaudeMessage::User { session_id }
            | ClaudeMessage::Result { session_id, .. } => session_id.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        #[serde(default)]
        id: Option<String>,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub text: Option<String>,
}

/// The `request` member of a `control_request`.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlRequest {
    pub subtype: String,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub tool_use_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AskUserQuestionInput {
    pub questions: Vec<QuestionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ExitPlanModeInput {
    #[serde(default)]
    pub plan: Option<String>,
}

/// A user turn on stdin.
pub fn user_message(content: &str) -> String {
    json!({
        "type": "user",
        "message": {"role": "user", "content": content}
    })
    .to_string()
}

/// Grant a `can_use_tool` request, optionally with edited input.
pub fn permission_allow(request_id: &str, updated_input: Value) -> String {
    json!({
        "type": "control_response",
        "response": {
            "subtype": "success",
            "request_id": request_id,
            "response": {"behavior": "allow", "updatedInput": updated_input}
        }
    })
    .to_string()
}

pub fn permission_deny(request_id: &str, message: &str) -> String {
    json!({
        "type": "control_response",
        "response": {
            "subtype": "success",
            "request_id": request_id,
            "response": {"behavior": "deny", "message": message}
        }
    })
    .to_string()
}

/// Ask the CLI to abandon the current turn but keep the process.
pub fn interrupt_request(request_id: &str) -> String {
    json!({
        "type": "control_request",
        "request_id": request_id,
        "request": {"subtype": "interrupt"}
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    mod inbound {
        use super::*;

        #[test]
        fn assistant_with_mixed_blocks() {
            let msg: ClaudeMessage = serde_json::from_str(
                r#"{"type":"assistant","session_id":"s1","parent_tool_use_id":"task-1","message":{"role":"assistant","content":[
                    {"type":"thinking","thinking":"hmm"},
                    {"type":"text","text":"Hi"},
                    {"type":"tool_use","id":"tu-1","name":"Bash","input":{"command":"ls"}},
                    {"type":"server_tool_use"}
                ]}}"#,
            )
            .unwrap();

            let ClaudeMessage::Assistant {
                message,
                parent_tool_use_id,
                ..
            } = &msg
            else {
                panic!("expected assistant");
            };
            assert_eq!(parent_tool_use_id.as_deref(), Some("task-1"));
            assert_eq!(message.content.len(), 4);
            assert!(matches!(message.content[3], ContentBlock::Other));
            assert_eq!(msg.session_id(), Some("s1"));
        }

        #[test]
        fn control_request_can_use_tool() {
            let msg: ClaudeMessage = serde_json::from_str(
                r#"{"type":"control_request","request_id":"req-1","request":{"subtype":"can_use_tool","tool_name":"Edit","input":{"file_path":"a"}}}"#,
            )
            .unwrap();
            let ClaudeMessage::ControlRequest { request_id, request } = msg else {
                panic!("expected control request");
            };
            assert_eq!(request_id, "req-1");
            assert_eq!(request.subtype, "can_use_tool");
            assert_eq!(request.tool_name.as_deref(), Some("Edit"));
        }

        #[test]
        fn unknown_types_decode_as_other() {
            let msg: ClaudeMessage =
                serde_json::from_str(r#"{"type":"control_response","response":{}}"#).unwrap();
            assert!(matches!(msg, ClaudeMessage::Other));
        }

        #[test]
        fn bare_result() {
            let msg: ClaudeMessage = serde_json::from_str(r#"{"type":"result"}"#).unwrap();
            assert!(matches!(msg, ClaudeMessage::Result { is_error: false, .. }));
        }
    }

    mod outbound {
        use super::*;

        fn parse(line: &str) -> Value {
            serde_json::from_str(line).unwrap()
        }

        #[test]
        fn user_envelope() {
            assert_eq!(
                parse(&user_message("hello")),
                json!({"type":"user","message":{"role":"user","content":"hello"}})
            );
        }

        #[test]
        fn allow_carries_updated_input() {
            let value = parse(&permission_allow("req-9", json!({"command": "ls"})));
            assert_eq!(value["type"], "control_response");
            assert_eq!(value["response"]["request_id"], "req-9");
            assert_eq!(value["response"]["response"]["behavior"], "allow");
            assert_eq!(value["response"]["response"]["updatedInput"]["command"], "ls");
        }

        #[test]
        fn deny_carries_message() {
            let value = parse(&permission_deny("req-9", "not now"));
            assert_eq!(value["response"]["response"]["behavior"], "deny");
            assert_eq!(value["response"]["response"]["message"], "not now");
        }

        #[test]
        fn interrupt_shape() {
            let value = parse(&interrupt_request("int-1"));
            assert_eq!(value["request"]["subtype"], "interrupt");
            assert_eq!(value["request_id"], "int-1");
        }
    }
}
