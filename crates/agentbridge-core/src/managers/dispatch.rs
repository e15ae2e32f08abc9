//! Routes each chat to the adapter of the agent it was bound to.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::agents::AgentKind;
use crate::error::AgentError;
use crate::sync::lock;

use super::claude_agent::ClaudeAgentManager;
use super::codex_agent::CodexAgentManager;
use super::context::AgentContext;
use super::copilot_agent::CopilotAgentManager;
use super::gemini_agent::GeminiAgentManager;
use super::opencode_agent::OpenCodeAgentManager;
use super::service::{
    AgentService, DoneCallback, EventCallback, SendMessageRequest, ToolApprovalDecision,
};

/// One adapter per agent, all sharing the same context.
///
/// A chat must be [bound](AgentDispatcher::bind) before it is used; calls
/// for an unbound chat fail with [`AgentError::UnknownChat`] or do nothing.
pub struct AgentDispatcher {
    ctx: AgentContext,
    claude: ClaudeAgentManager,
    codex: CodexAgentManager,
    copilot: CopilotAgentManager,
    gemini: GeminiAgentManager,
    opencode: OpenCodeAgentManager,
    bindings: Mutex<HashMap<String, AgentKind>>,
}

impl AgentDispatcher {
    pub fn new(ctx: AgentContext) -> Self {
        Self {
            claude: ClaudeAgentManager::new(ctx.clone()),
            codex: CodexAgentManager::new(ctx.clone()),
            copilot: CopilotAgentManager::new(ctx.clone()),
            gemini: GeminiAgentManager::new(ctx.clone()),
            opencode: OpenCodeAgentManager::new(ctx.clone()),
            ctx,
            bindings: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &AgentContext {
        &self.ctx
    }

    /// Bind `chat_id` to `agent`. Rebinding to another agent removes the
    /// chat from the previous adapter; the chat's observers stay registered.
    pub fn bind(&self, chat_id: &str, agent: AgentKind) {
        let previous = lock(&self.bindings).insert(chat_id.to_string(), agent);
        if let Some(previous) = previous.filter(|p| *p != agent) {
            log::info!("chat {chat_id} moves from {previous} to {agent}");
            let observers = &self.ctx.observers;
            let (on_event, on_done) = (observers.event(chat_id), observers.done(chat_id));
            self.service(previous).remove_chat(chat_id);
            if let Some(callback) = on_event {
                observers.set_event(chat_id, callback);
            }
            if let Some(callback) = on_done {
                observers.set_done(chat_id, callback);
            }
        }
    }

    pub fn kind_of(&self, chat_id: &str) -> Option<AgentKind> {
        lock(&self.bindings).get(chat_id).copied()
    }

    pub fn service(&self, agent: AgentKind) -> &dyn AgentService {
        match agent {
            AgentKind::Claude => &self.claude,
            AgentKind::Codex => &self.codex,
            AgentKind::Copilot => &self.copilot,
            AgentKind::Gemini => &self.gemini,
            AgentKind::OpenCode => &self.opencode,
        }
    }

    /// Bind the chat and reseed its session id from the persistence sink.
    pub fn restore_chat(&self, chat_id: &str, agent: AgentKind) -> Result<Option<String>, AgentError> {
        self.bind(chat_id, agent);
        let session_id = self
            .ctx
            .sink
            .last_session_id(chat_id)
            .map_err(|err| AgentError::Protocol(format!("reading stored session: {err}")))?;
        if let Some(session_id) = &session_id {
            log::info!("restoring {agent} session {session_id} for chat {chat_id}");
            self.service(agent).set_session_id(chat_id, Some(session_id.clone()));
        }
        Ok(session_id)
    }

    fn route(&self, chat_id: &str) -> Result<&dyn AgentService, AgentError> {
        self.kind_of(chat_id)
            .map(|agent| self.service(agent))
            .ok_or_else(|| AgentError::UnknownChat(chat_id.to_string()))
    }
}

impl AgentService for AgentDispatcher {
    fn send_message(&self, request: SendMessageRequest) -> Result<(), AgentError> {
        self.route(&request.chat_id)?.send_message(request)
    }

    fn send_tool_approval(&self, chat_id: &str, decision: ToolApprovalDecision) -> Result<(), AgentError> {
        self.route(chat_id)?.send_tool_approval(chat_id, decision)
    }

    fn interrupt_turn(&self, chat_id: &str) -> Result<(), AgentError> {
        self.route(chat_id)?.interrupt_turn(chat_id)
    }

    fn stop_chat(&self, chat_id: &str) {
        if let Ok(service) = self.route(chat_id) {
            service.stop_chat(chat_id);
        }
    }

    fn is_running(&self, chat_id: &str) -> bool {
        self.route(chat_id)
            .map(|service| service.is_running(chat_id))
            .unwrap_or(false)
    }

    fn session_id(&self, chat_id: &str) -> Option<String> {
        self.route(chat_id).ok()?.session_id(chat_id)
    }

    fn set_session_id(&self, chat_id: &str, session_id: Option<String>) {
        if let Ok(service) = self.route(chat_id) {
            service.set_session_id(chat_id, session_id);
        }
    }

    /// Removes the chat and its binding.
    fn remove_chat(&self, chat_id: &str) {
        let bound = lock(&self.bindings).remove(chat_id);
        match bound {
            Some(agent) => self.service(agent).remove_chat(chat_id),
            None => self.ctx.observers.remove(chat_id),
        }
    }

    /// Observers live in the shared context, so they can be registered
    /// before the chat is bound.
    fn on_event(&self, chat_id: &str, callback: EventCallback) {
        self.ctx.observers.set_event(chat_id, callback);
    }

    fn on_done(&self, chat_id: &str, callback: DoneCallback) {
        self.ctx.observers.set_done(chat_id, callback);
    }
}
