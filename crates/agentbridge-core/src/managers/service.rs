//! The agent-agnostic contract every adapter implements.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::agents::AgentEvent;
use crate::error::AgentError;
use crate::sync::lock;

pub type EventCallback = Arc<dyn Fn(AgentEvent) + Send + Sync>;
pub type DoneCallback = Arc<dyn Fn() + Send + Sync>;

/// Everything needed to deliver one user turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendMessageRequest {
    pub chat_id: String,
    pub prompt: String,
    pub working_dir: String,
    pub log_dir: Option<String>,
    pub model_version: Option<String>,
    pub permission_mode: Option<String>,
    /// Prepended to the first prompt of a conversation without a session.
    pub init_prompt: Option<String>,
    /// Selects the auto-approval context; OpenCode also uses it as the
    /// session title.
    pub project_name: Option<String>,
}

impl SendMessageRequest {
    pub fn new(
        chat_id: impl Into<String>,
        prompt: impl Into<String>,
        working_dir: impl Into<String>,
    ) -> Self {
        Self {
            chat_id: chat_id.into(),
            prompt: prompt.into(),
            working_dir: working_dir.into(),
            ..Self::default()
        }
    }

    pub fn log_dir(mut self, dir: impl Into<String>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model_version = Some(model.into());
        self
    }

    pub fn permission_mode(mut self, mode: impl Into<String>) -> Self {
        self.permission_mode = Some(mode.into());
        self
    }

    pub fn init_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.init_prompt = Some(prompt.into());
        self
    }

    pub fn project(mut self, name: impl Into<String>) -> Self {
        self.project_name = Some(name.into());
        self
    }
}

/// A user's answer to a `toolApproval`, `question` or `planApproval` event.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolApprovalDecision {
    pub request_id: String,
    pub approved: bool,
    /// Replacement input (Claude `updatedInput`, question answers).
    pub tool_input: Option<Value>,
    pub deny_message: Option<String>,
}

impl ToolApprovalDecision {
    pub fn allow(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            approved: true,
            tool_input: None,
            deny_message: None,
        }
    }

    pub fn deny(request_id: impl Into<String>) -> Self {
        Self {
            approved: false,
            ..Self::allow(request_id)
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.tool_input = Some(input);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.deny_message = Some(message.into());
        self
    }
}

/// One conversation backend.
///
/// Methods block; callers that need concurrency call them from their own
/// threads. `send_message` returns once the prompt is dispatched for
/// streaming agents and once the whole turn is done for OpenCode.
pub trait AgentService: Send + Sync {
    fn send_message(&self, request: SendMessageRequest) -> Result<(), AgentError>;

    /// A no-op for agents without an interactive approval channel.
    fn send_tool_approval(
        &self,
        chat_id: &str,
        decision: ToolApprovalDecision,
    ) -> Result<(), AgentError>;

    /// Soft-cancel the current turn, or stop the chat where the protocol
    /// has no cancel.
    fn interrupt_turn(&self, chat_id: &str) -> Result<(), AgentError>;

    /// Kill the backing process and settle every pending request.
    fn stop_chat(&self, chat_id: &str);

    fn is_running(&self, chat_id: &str) -> bool;

    fn session_id(&self, chat_id: &str) -> Option<String>;

    fn set_session_id(&self, chat_id: &str, session_id: Option<String>);

    /// Stop the chat and forget it. Removing an unknown chat does nothing.
    fn remove_chat(&self, chat_id: &str);

    /// Replaces any observer registered earlier for `chat_id`.
    fn on_event(&self, chat_id: &str, callback: EventCallback);

    fn on_done(&self, chat_id: &str, callback: DoneCallback);
}

/// The single event observer and done observer of each chat.
#[derive(Default)]
pub struct ChatObservers {
    events: Mutex<HashMap<String, EventCallback>>,
    done: Mutex<HashMap<String, DoneCallback>>,
}

impl ChatObservers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_event(&self, chat_id: &str, callback: EventCallback) {
        lock(&self.events).insert(chat_id.to_string(), callback);
    }

    pub fn set_done(&self, chat_id: &str, callback: DoneCallback) {
        lock(&self.done).insert(chat_id.to_string(), callback);
    }

    pub fn event(&self, chat_id: &str) -> Option<EventCallback> {
        lock(&self.events).get(chat_id).cloned()
    }

    pub fn done(&self, chat_id: &str) -> Option<DoneCallback> {
        lock(&self.done).get(chat_id).cloned()
    }

    pub fn remove(&self, chat_id: &str) {
        lock(&self.events).remove(chat_id);
        lock(&self.done).remove(chat_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn request_builder() {
        let request = SendMessageRequest::new("c1", "hi", "/tmp")
            .model("gpt-5")
            .project("web")
            .init_prompt("Be brief.");
        assert_eq!(request.chat_id, "c1");
        assert_eq!(request.model_version.as_deref(), Some("gpt-5"));
        assert_eq!(request.project_name.as_deref(), Some("web"));
        assert_eq!(request.log_dir, None);
    }

    #[test]
    fn deny_keeps_request_id() {
        let decision = ToolApprovalDecision::deny("7").with_message("no");
        assert!(!decision.approved);
        assert_eq!(decision.request_id, "7");
        assert_eq!(decision.deny_message.as_deref(), Some("no"));
    }

    #[test]
    fn observers_replace_instead_of_accumulating() {
        let observers = ChatObservers::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&first);
        observers.set_event("c", Arc::new(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        let s = Arc::clone(&second);
        observers.set_event("c", Arc::new(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        }));

        if let Some(callback) = observers.event("c") {
            callback(AgentEvent::TurnComplete);
        }
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        observers.remove("c");
        assert!(observers.event("c").is_none());
    }
}
