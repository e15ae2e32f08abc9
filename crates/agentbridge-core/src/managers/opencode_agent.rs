//! OpenCode adapter: an `opencode serve` HTTP server per chat.
//!
//! The server is spawned on the first free port above the configured base
//! and health-polled before use. Sessions are created with a blanket
//! permission grant. A turn is one blocking prompt call, so
//! `send_message` returns only after the whole turn has been emitted.

use std::sync::Arc;

use serde_json::Value;

use crate::agents::opencode::{find_available_port, parse_parts, OpenCodeClient, OpenCodeConfig};
use crate::agents::{compose_prompt, AgentEvent, AgentKind};
use crate::availability::install_instructions;
use crate::error::AgentError;
use crate::logging::{Direction, WireLog};
use crate::transport::{ProcessEvent, ProcessId, SubscriptionId};

use super::context::{AgentContext, SpawnWatch};
use super::registry::{ChatEntry, ChatRegistry};
use super::service::{
    AgentService, DoneCallback, EventCallback, SendMessageRequest, ToolApprovalDecision,
};

const DEFAULT_SESSION_TITLE: &str = "agentbridge";

type Connector = Box<dyn Fn(u16) -> OpenCodeClient + Send + Sync>;

#[derive(Default)]
struct OpenCodeChat {
    process: Option<ProcessId>,
    subscription: Option<SubscriptionId>,
    client: Option<Arc<OpenCodeClient>>,
    session_id: Option<String>,
    wire_log: WireLog,
    watch: SpawnWatch,
    turns_sent: u32,
}

type Entry = Arc<ChatEntry<OpenCodeChat>>;

pub struct OpenCodeAgentManager {
    ctx: AgentContext,
    chats: ChatRegistry<OpenCodeChat>,
    connect: Connector,
}

impl OpenCodeAgentManager {
    pub fn new(ctx: AgentContext) -> Self {
        Self {
            ctx,
            chats: ChatRegistry::new(),
            connect: Box::new(OpenCodeClient::new),
        }
    }

    /// Build the HTTP client for a freshly spawned server's port.
    pub fn with_connector<F>(mut self, connect: F) -> Self
    where
        F: Fn(u16) -> OpenCodeClient + Send + Sync + 'static,
    {
        self.connect = Box::new(connect);
        self
    }

    fn start(&self, chat_id: &str, entry: &Entry, request: &SendMessageRequest) -> Result<Arc<OpenCodeClient>, AgentError> {
        let base = self.ctx.settings.opencode_base_port;
        let port = find_available_port(base)
            .ok_or_else(|| AgentError::Protocol(format!("no free port at or above {base}")))?;
        let spawn = OpenCodeConfig {
            binary_path: self.ctx.binary_path(AgentKind::OpenCode),
            working_dir: request.working_dir.clone(),
            port,
            shell_prefix: self.ctx.shell_prefix(),
        }
        .build();
        let process = self
            .ctx
            .transport
            .spawn(spawn)
            .map_err(|err| self.ctx.spawn_error(AgentKind::OpenCode, err))?;
        self.ctx.availability.mark_available(AgentKind::OpenCode);

        let client = Arc::new((self.connect)(port));
        {
            let mut chat = entry.state();
            chat.process = Some(process.clone());
            chat.client = Some(Arc::clone(&client));
            chat.wire_log = WireLog::open(request.log_dir.as_deref(), chat_id);
            chat.watch = SpawnWatch::default();
        }

        let listener = {
            let ctx = self.ctx.clone();
            let entry = Arc::clone(entry);
            let chat_id = chat_id.to_string();
            let process = process.clone();
            Arc::new(move |event: ProcessEvent| on_process_event(&ctx, &chat_id, &entry, &process, event))
        };
        match self.ctx.transport.subscribe(&process, listener) {
            Ok(subscription) => {
                let mut chat = entry.state();
                if chat.process.as_ref() == Some(&process) {
                    chat.subscription = Some(subscription);
                }
            }
            Err(err) => {
                entry.state().process = None;
                self.ctx.transport.kill(&process);
                return Err(err.into());
            }
        }
        log::info!("opencode server {process} starting on port {port} for chat {chat_id}");

        let alive = || entry.state().process.as_ref() == Some(&process);
        let healthy = client.wait_until_healthy(
            self.ctx.settings.opencode_health_retries,
            self.ctx.settings.opencode_health_interval(),
            alive,
        );
        if let Err(err) = healthy {
            if let Some(process) = self.detach(entry) {
                self.ctx.transport.kill(&process);
            }
            if !self.ctx.availability.is_available(AgentKind::OpenCode) {
                let binary = self.ctx.binary_path(AgentKind::OpenCode);
                return Err(AgentError::ToolNotInstalled {
                    agent: AgentKind::OpenCode,
                    instructions: install_instructions(AgentKind::OpenCode, &binary),
                });
            }
            return Err(err);
        }
        Ok(client)
    }

    fn detach(&self, entry: &Entry) -> Option<ProcessId> {
        let (process, subscription) = {
            let mut chat = entry.state();
            let process = chat.process.take()?;
            chat.client = None;
            (process, chat.subscription.take())
        };
        if let Some(subscription) = subscription {
            self.ctx.transport.unsubscribe(subscription);
        }
        Some(process)
    }

    fn is_current(entry: &Entry, process: &Option<ProcessId>) -> bool {
        process.is_some() && entry.state().process == *process
    }
}

fn on_process_event(
    ctx: &AgentContext,
    chat_id: &str,
    entry: &Entry,
    process: &ProcessId,
    event: ProcessEvent,
) {
    match event {
        ProcessEvent::Stdout(chunk) => {
            let mut chat = entry.state();
            if chat.process.as_ref() == Some(process) {
                chat.watch.stdout();
                chat.wire_log.record(Direction::Stdout, &chunk);
            }
        }
        ProcessEvent::Stderr(line) => {
            log::debug!("opencode stderr [{chat_id}]: {}", line.trim_end());
            let notice = {
                let mut chat = entry.state();
                if chat.process.as_ref() != Some(process) {
                    return;
                }
                chat.wire_log.record(Direction::Stderr, &line);
                chat.watch.stderr(ctx, AgentKind::OpenCode, &line)
            };
            if let Some(notice) = notice {
                ctx.emit(chat_id, notice);
            }
        }
        ProcessEvent::Exit(exit) => {
            let (subscription, mut events) = {
                let mut chat = entry.state();
                if chat.process.as_ref() != Some(process) {
                    log::debug!("ignoring close of stale opencode server {process}");
                    return;
                }
                chat.process = None;
                chat.client = None;
                let events: Vec<AgentEvent> =
                    chat.watch.exit(ctx, AgentKind::OpenCode, &exit).into_iter().collect();
                (chat.subscription.take(), events)
            };
            if let Some(subscription) = subscription {
                ctx.transport.unsubscribe(subscription);
            }
            log::info!("opencode server {process} for chat {chat_id} exited with {}", exit.code);
            events.push(AgentEvent::Done);
            ctx.emit_all(chat_id, events);
        }
    }
}

impl AgentService for OpenCodeAgentManager {
    fn send_message(&self, request: SendMessageRequest) -> Result<(), AgentError> {
        let chat_id = request.chat_id.as_str();
        let entry = self.chats.get_or_insert(chat_id);
        let _setup = entry.setup();

        let (running, known_session, first_turn) = {
            let chat = entry.state();
            (
                chat.client.clone().filter(|_| chat.process.is_some()),
                chat.session_id.clone(),
                chat.session_id.is_none() && chat.turns_sent == 0,
            )
        };
        let client = match running {
            Some(client) => client,
            None => self.start(chat_id, &entry, &request)?,
        };

        let session_id = match known_session {
            Some(session_id) => session_id,
            None => {
                let title = request.project_name.as_deref().unwrap_or(DEFAULT_SESSION_TITLE);
                let session_id = client.create_session(title)?;
                entry.state().session_id = Some(session_id.clone());
                self.ctx.emit(
                    chat_id,
                    AgentEvent::SessionId {
                        session_id: session_id.clone(),
                    },
                );
                session_id
            }
        };

        let prompt = compose_prompt(request.init_prompt.as_deref(), &request.prompt, first_turn);
        let (process, wire_log) = {
            let mut chat = entry.state();
            chat.turns_sent += 1;
            (chat.process.clone(), chat.wire_log.clone())
        };
        wire_log.record(Direction::Request, &prompt);

        let outcome = client.prompt(&session_id, &prompt, request.model_version.as_deref());
        if !Self::is_current(&entry, &process) {
            log::debug!("opencode turn for {chat_id} finished after the server was stopped");
            return outcome.map(|_| ());
        }
        match outcome {
            Ok(response) => {
                wire_log.record(Direction::Response, &Value::Array(response.parts.clone()).to_string());
                let mut events = Vec::new();
                if let Some(message) = response.error_message() {
                    events.push(AgentEvent::info(format!("Error: {message}")));
                }
                events.extend(parse_parts(&response.parts));
                events.push(AgentEvent::TurnComplete);
                self.ctx.emit_all(chat_id, events);
                Ok(())
            }
            Err(err) => {
                log::warn!("opencode prompt for {chat_id} failed: {err}");
                self.ctx.emit_all(
                    chat_id,
                    [AgentEvent::info(format!("Error: {err}")), AgentEvent::TurnComplete],
                );
                Err(err)
            }
        }
    }

    fn send_tool_approval(&self, chat_id: &str, decision: ToolApprovalDecision) -> Result<(), AgentError> {
        log::debug!(
            "opencode sessions allow every tool; ignoring {} for {chat_id}",
            decision.request_id
        );
        Ok(())
    }

    fn interrupt_turn(&self, chat_id: &str) -> Result<(), AgentError> {
        let Some(entry) = self.chats.get(chat_id) else {
            return Ok(());
        };
        let target = {
            let chat = entry.state();
            chat.client.clone().zip(chat.session_id.clone())
        };
        match target {
            Some((client, session_id)) => client.abort(&session_id),
            None => Ok(()),
        }
    }

    fn stop_chat(&self, chat_id: &str) {
        let Some(entry) = self.chats.get(chat_id) else {
            return;
        };
        if let Some(process) = self.detach(&entry) {
            self.ctx.transport.kill(&process);
            self.ctx.emit(chat_id, AgentEvent::Done);
        }
    }

    fn is_running(&self, chat_id: &str) -> bool {
        self.chats
            .with_state(chat_id, |chat| chat.process.is_some())
            .unwrap_or(false)
    }

    fn session_id(&self, chat_id: &str) -> Option<String> {
        self.chats.with_state(chat_id, |chat| chat.session_id.clone()).flatten()
    }

    fn set_session_id(&self, chat_id: &str, session_id: Option<String>) {
        self.chats.get_or_insert(chat_id).state().session_id = session_id;
    }

    fn remove_chat(&self, chat_id: &str) {
        if let Some(entry) = self.chats.remove(chat_id) {
            if let Some(process) = self.detach(&entry) {
                self.ctx.transport.kill(&process);
            }
        }
        self.ctx.observers.remove(chat_id);
    }

    fn on_event(&self, chat_id: &str, callback: EventCallback) {
        self.ctx.observers.set_event(chat_id, callback);
    }

    fn on_done(&self, chat_id: &str, callback: DoneCallback) {
        self.ctx.observers.set_done(chat_id, callback);
    }
}
