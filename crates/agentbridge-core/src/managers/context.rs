//! Collaborators shared by every adapter.

use std::sync::Arc;

use crate::agents::{AgentEvent, AgentKind};
use crate::approval::ProjectApprovals;
use crate::availability::{install_instructions, is_not_installed, ToolAvailability};
use crate::config::AgentSettings;
use crate::error::{AgentError, TransportError};
use crate::event_bus::EventBus;
use crate::persistence::{EventSink, NullSink};
use crate::transport::{LocalTransport, ProcessExit, Transport};

use super::service::ChatObservers;

#[derive(Clone)]
pub struct AgentContext {
    pub transport: Arc<dyn Transport>,
    pub observers: Arc<ChatObservers>,
    pub sink: Arc<dyn EventSink>,
    pub approvals: Arc<ProjectApprovals>,
    pub availability: Arc<ToolAvailability>,
    pub event_bus: Arc<EventBus>,
    pub settings: Arc<AgentSettings>,
}

impl AgentContext {
    /// In-memory approvals, no persistence.
    pub fn new(transport: Arc<dyn Transport>, settings: AgentSettings) -> Self {
        Self {
            transport,
            observers: Arc::new(ChatObservers::new()),
            sink: Arc::new(NullSink),
            approvals: Arc::new(ProjectApprovals::in_memory()),
            availability: Arc::new(ToolAvailability::new()),
            event_bus: Arc::new(EventBus::new()),
            settings: Arc::new(settings),
        }
    }

    /// Real child processes.
    pub fn local(settings: AgentSettings) -> Self {
        Self::new(Arc::new(LocalTransport::new()), settings)
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_approvals(mut self, approvals: Arc<ProjectApprovals>) -> Self {
        self.approvals = approvals;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn binary_path(&self, agent: AgentKind) -> String {
        self.settings.binary_path(agent).to_string()
    }

    pub fn shell_prefix(&self) -> Option<String> {
        self.settings.agent_shell.clone()
    }

    /// Persist, broadcast, then hand to the chat's observer.
    ///
    /// Auto-approved approvals stop before the observer: they were already
    /// answered and must not show up as a prompt.
    pub fn emit(&self, chat_id: &str, event: AgentEvent) {
        if let Err(err) = self.sink.append_event(chat_id, &event) {
            log::warn!("failed to persist event for {chat_id}: {err}");
        }
        self.event_bus.publish_event(chat_id, &event);

        if matches!(
            event,
            AgentEvent::ToolApproval {
                auto_approved: true,
                ..
            }
        ) {
            return;
        }
        let done = matches!(event, AgentEvent::Done);
        if let Some(observer) = self.observers.event(chat_id) {
            observer(event);
        }
        if done {
            if let Some(observer) = self.observers.done(chat_id) {
                observer();
            }
            self.event_bus.publish_done(chat_id);
        }
    }

    pub fn emit_all(&self, chat_id: &str, events: impl IntoIterator<Item = AgentEvent>) {
        for event in events {
            self.emit(chat_id, event);
        }
    }

    /// Turn a failed spawn into install instructions when the CLI is missing.
    pub fn spawn_error(&self, agent: AgentKind, err: TransportError) -> AgentError {
        if !looks_not_installed(&err) {
            return AgentError::Transport(err);
        }
        let binary = self.binary_path(agent);
        self.availability.mark_unavailable(agent, err.to_string());
        AgentError::ToolNotInstalled {
            agent,
            instructions: install_instructions(agent, &binary),
        }
    }
}

/// Watches a freshly spawned process for the two asynchronous signs of a
/// missing CLI: a shell diagnostic on stderr before any stdout, and exit
/// status 127. Reports at most once per process.
#[derive(Debug, Default)]
pub(crate) struct SpawnWatch {
    saw_stdout: bool,
    reported: bool,
}

impl SpawnWatch {
    pub fn stdout(&mut self) {
        self.saw_stdout = true;
    }

    pub fn stderr(&mut self, ctx: &AgentContext, agent: AgentKind, line: &str) -> Option<AgentEvent> {
        if self.saw_stdout || self.reported {
            return None;
        }
        let err = ctx
            .availability
            .classify(agent, &ctx.binary_path(agent), line)?;
        self.reported = true;
        Some(AgentEvent::info(err.to_string()))
    }

    pub fn exit(&mut self, ctx: &AgentContext, agent: AgentKind, exit: &ProcessExit) -> Option<AgentEvent> {
        if self.reported || self.saw_stdout || !exit.is_command_not_found() {
            return None;
        }
        self.reported = true;
        let binary = ctx.binary_path(agent);
        ctx.availability
            .mark_unavailable(agent, format!("`{binary}` exited with status 127"));
        Some(AgentEvent::info(install_instructions(agent, &binary)))
    }

    pub fn reported(&self) -> bool {
        self.reported
    }
}

/// The same approval, flagged as already answered.
pub(crate) fn mark_auto_approved(event: AgentEvent) -> AgentEvent {
    match event {
        AgentEvent::ToolApproval {
            request_id,
            name,
            input,
            display_input,
            command_prefixes,
            ..
        } => AgentEvent::ToolApproval {
            request_id,
            name,
            input,
            display_input,
            command_prefixes,
            auto_approved: true,
        },
        other => other,
    }
}

/// Spawn errors from the OS carry `NotFound` rather than a matching text.
pub(crate) fn looks_not_installed(err: &TransportError) -> bool {
    match err {
        TransportError::Spawn { source, .. } => {
            source.kind() == std::io::ErrorKind::NotFound || is_not_installed(&source.to_string())
        }
        other => is_not_installed(&other.to_string()),
    }
}
