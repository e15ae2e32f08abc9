//! `codex app-server` wire types.
//!
//! The app-server speaks JSON-RPC without the `"jsonrpc"` member. Replies to
//! our requests are consumed by the [`RpcCorrelator`](crate::agents::rpc::RpcCorrelator);
//! everything else arrives here as a [`ServerMessage`]: a notification when
//! `id` is absent, a server request (approval) when it is present.

use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct ServerMessage {
    pub method: String,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub params: Value,
}

/// `item/started` and `item/completed` payloads.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum CodexItem {
    CommandExecution {
        #[serde(default)]
        command: String,
    },
    FileChange {
        #[serde(default)]
        changes: Vec<FileChange>,
        #[serde(default)]
        file_path: Option<String>,
        #[serde(default)]
        diff: Option<String>,
    },
    McpToolCall {
        #[serde(default, alias = "tool")]
        tool_name: Option<String>,
        #[serde(default)]
        arguments: Value,
    },
    AgentMessage {
        #[serde(default)]
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileChange {
    pub path: String,
    #[serde(default)]
    pub diff: String,
}

impl CodexItem {
    /// `(path, diff)` pairs of a file change, whichever shape it came in.
    pub fn file_diffs(&self) -> Vec<(String, String)> {
        match self {
            CodexItem::FileChange {
                changes,
                file_path,
                diff,
            } if changes.is_empty() => vec![(
                file_path.clone().unwrap_or_default(),
                diff.clone().unwrap_or_default(),
            )],
            CodexItem::FileChange { changes, .. } => changes
                .iter()
                .map(|c| (c.path.clone(), c.diff.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThreadResult {
    #[serde(default)]
    pub thread: Option<IdOnly>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TurnResult {
    #[serde(default)]
    pub turn: Option<IdOnly>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdOnly {
    #[serde(default)]
    pub id: Option<String>,
}

pub fn initialize_params() -> Value {
    json!({
        "clientInfo": {
            "name": "agentbridge",
            "version": env!("CARGO_PKG_VERSION"),
        }
    })
}

pub fn thread_start_params(cwd: &str, approval_policy: &str, model: Option<&str>) -> Value {
    let mut params = json!({ "cwd": cwd, "approvalPolicy": approval_policy });
    if let Some(model) = model.filter(|m| !m.is_empty()) {
        params["model"] = json!(model);
    }
    params
}

pub fn thread_resume_params(thread_id: &str) -> Value {
    json!({ "threadId": thread_id })
}

pub fn turn_start_params(thread_id: &str, text: &str) -> Value {
    json!({
        "threadId": thread_id,
        "input": [{ "type": "text", "text": text }],
    })
}

pub fn turn_interrupt_params(thread_id: &str, turn_id: &str) -> Value {
    json!({ "threadId": thread_id, "turnId": turn_id })
}

/// Result body answering an approval server request.
pub fn approval_decision(approved: bool) -> Value {
    json!({ "decision": if approved { "accept" } else { "decline" } })
}

#[cfg(test)]
mod tests {
    use super::*;

    mod inbound {
        use super::*;

        #[test]
        fn notification_and_request() {
            let note: ServerMessage =
                serde_json::from_str(r#"{"method":"turn/completed","params":{}}"#).unwrap();
            assert!(note.id.is_none());

            let request: ServerMessage = serde_json::from_str(
                r#"{"method":"item/commandExecution/requestApproval","id":7,"params":{"command":"ls"}}"#,
            )
            .unwrap();
            assert_eq!(request.id, Some(json!(7)));
            assert_eq!(request.params["command"], "ls");
        }

        #[test]
        fn missing_params_is_null() {
            let note: ServerMessage = serde_json::from_str(r#"{"method":"x"}"#).unwrap();
            assert!(note.params.is_null());
        }

        #[test]
        fn items_by_type() {
            let cmd: CodexItem =
                serde_json::from_str(r#"{"type":"commandExecution","command":"git status","id":"i1"}"#)
                    .unwrap();
            assert!(matches!(cmd, CodexItem::CommandExecution { command } if command == "git status"));

            let mcp: CodexItem =
                serde_json::from_str(r#"{"type":"mcpToolCall","tool":"search","arguments":{"q":1}}"#)
                    .unwrap();
            assert!(matches!(mcp, CodexItem::McpToolCall { tool_name: Some(t), .. } if t == "search"));

            let other: CodexItem = serde_json::from_str(r#"{"type":"webSearch"}"#).unwrap();
            assert!(matches!(other, CodexItem::Other));
        }

        #[test]
        fn file_change_shapes() {
            let flat: CodexItem =
                serde_json::from_str(r#"{"type":"fileChange","filePath":"a.rs","diff":"+x"}"#).unwrap();
            assert_eq!(flat.file_diffs(), [("a.rs".to_string(), "+x".to_string())]);

            let listed: CodexItem = serde_json::from_str(
                r#"{"type":"fileChange","changes":[{"path":"a.rs","diff":"+x"},{"path":"b.rs","kind":"add"}]}"#,
            )
            .unwrap();
            assert_eq!(listed.file_diffs().len(), 2);
        }

        #[test]
        fn thread_and_turn_results() {
            let thread: ThreadResult =
                serde_json::from_value(json!({"thread": {"id": "th-1", "preview": ""}})).unwrap();
            assert_eq!(thread.thread.and_then(|t| t.id).as_deref(), Some("th-1"));

            let turn: TurnResult = serde_json::from_value(json!({"turn": {"id": "tu-1"}})).unwrap();
            assert_eq!(turn.turn.and_then(|t| t.id).as_deref(), Some("tu-1"));
        }
    }

    mod outbound {
        use super::*;

        #[test]
        fn thread_start() {
            assert_eq!(
                thread_start_params("/tmp", "untrusted", None),
                json!({"cwd": "/tmp", "approvalPolicy": "untrusted"})
            );
            assert_eq!(
                thread_start_params("/tmp", "never", Some("o3"))["model"],
                "o3"
            );
        }

        #[test]
        fn turn_start_uses_typed_input() {
            assert_eq!(
                turn_start_params("th-1", "hi"),
                json!({"threadId": "th-1", "input": [{"type": "text", "text": "hi"}]})
            );
        }

        #[test]
        fn decisions() {
            assert_eq!(approval_decision(true), json!({"decision": "accept"}));
            assert_eq!(approval_decision(false), json!({"decision": "decline"}));
        }
    }
}
