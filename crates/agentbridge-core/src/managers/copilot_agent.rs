//! Copilot adapter: `copilot --acp --stdio`, one process per chat.
//!
//! The handshake negotiates the protocol version and learns whether the
//! agent can load an earlier session. `session/prompt` only answers when the
//! whole turn is over, so it is awaited on a background thread and the
//! caller returns as soon as the prompt is on the wire.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::Value;

use crate::agents::copilot::{
    cancel_params, cancelled_outcome, choose_option, initialize_params, load_session_params,
    new_session_params, prompt_params, selected_outcome, CopilotConfig, CopilotParser,
    InitializeResult, NewSessionResult, PendingPermission, PromptResult,
};
use crate::agents::line_buffer::LineBuffer;
use crate::agents::rpc::{coerce_id, id_to_string, PendingRequest, RpcCorrelator, RpcDialect};
use crate::agents::{compose_prompt, AgentEvent, AgentKind};
use crate::error::AgentError;
use crate::logging::{Direction, WireLog};
use crate::transport::{ProcessEvent, ProcessId, SubscriptionId};

use super::context::{mark_auto_approved, AgentContext, SpawnWatch};
use super::registry::{ChatEntry, ChatRegistry};
use super::service::{
    AgentService, DoneCallback, EventCallback, SendMessageRequest, ToolApprovalDecision,
};

const METHOD_NOT_FOUND: i64 = -32601;

/// A turn may run tools for a long time; only a stop ends the wait early.
const TURN_TIMEOUT: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Default)]
struct CopilotChat {
    process: Option<ProcessId>,
    subscription: Option<SubscriptionId>,
    rpc: Option<Arc<RpcCorrelator>>,
    lines: LineBuffer,
    parser: CopilotParser,
    session_id: Option<String>,
    /// A session is bound on the current process.
    session_ready: bool,
    supports_load_session: bool,
    project: Option<String>,
    wire_log: WireLog,
    watch: SpawnWatch,
    turns_sent: u32,
    /// Unanswered permission requests by request id.
    permissions: HashMap<String, PendingPermission>,
}

type Entry = Arc<ChatEntry<CopilotChat>>;

struct Link {
    process: ProcessId,
    rpc: Arc<RpcCorrelator>,
    wire_log: WireLog,
}

pub struct CopilotAgentManager {
    ctx: AgentContext,
    chats: ChatRegistry<CopilotChat>,
}

fn write_line(
    ctx: &AgentContext,
    process: &ProcessId,
    wire_log: &WireLog,
    line: &str,
) -> Result<(), AgentError> {
    log::debug!("copilot <- {line}");
    wire_log.record(Direction::Stdin, line);
    ctx.transport.write(process, line)?;
    Ok(())
}

impl CopilotAgentManager {
    pub fn new(ctx: AgentContext) -> Self {
        Self {
            ctx,
            chats: ChatRegistry::new(),
        }
    }

    fn link(&self, chat_id: &str, entry: &Entry) -> Result<Link, AgentError> {
        let chat = entry.state();
        match (&chat.process, &chat.rpc) {
            (Some(process), Some(rpc)) => Ok(Link {
                process: process.clone(),
                rpc: Arc::clone(rpc),
                wire_log: chat.wire_log.clone(),
            }),
            _ => Err(AgentError::NoSession(chat_id.to_string())),
        }
    }

    fn call(&self, link: &Link, method: &str, params: Value) -> Result<Value, AgentError> {
        link.rpc
            .call(method, params, self.ctx.settings.request_timeout(), |line| {
                write_line(&self.ctx, &link.process, &link.wire_log, line)
            })
    }

    fn start(&self, chat_id: &str, entry: &Entry, request: &SendMessageRequest) -> Result<Link, AgentError> {
        let spawn = CopilotConfig {
            binary_path: self.ctx.binary_path(AgentKind::Copilot),
            working_dir: request.working_dir.clone(),
            model: request.model_version.clone(),
            shell_prefix: self.ctx.shell_prefix(),
        }
        .build();
        let process = self
            .ctx
            .transport
            .spawn(spawn)
            .map_err(|err| self.ctx.spawn_error(AgentKind::Copilot, err))?;
        self.ctx.availability.mark_available(AgentKind::Copilot);

        let rpc = Arc::new(RpcCorrelator::new(RpcDialect::JsonRpc2));
        let wire_log = WireLog::open(request.log_dir.as_deref(), chat_id);
        {
            let mut chat = entry.state();
            chat.process = Some(process.clone());
            chat.rpc = Some(Arc::clone(&rpc));
            chat.lines = LineBuffer::new();
            chat.parser = CopilotParser::new();
            chat.session_ready = false;
            chat.supports_load_session = false;
            chat.wire_log = wire_log.clone();
            chat.watch = SpawnWatch::default();
            chat.permissions.clear();
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
        log::info!("copilot process {process} started for chat {chat_id}");

        let link = Link {
            process,
            rpc,
            wire_log,
        };
        let init: InitializeResult =
            serde_json::from_value(self.call(&link, "initialize", initialize_params())?)
                .unwrap_or_default();
        entry.state().supports_load_session = init.agent_capabilities.load_session;
        Ok(link)
    }

    /// Load the known session when the agent supports it, else create one.
    fn open_session(&self, chat_id: &str, entry: &Entry, link: &Link, cwd: &str) -> Result<String, AgentError> {
        let (known, can_load) = {
            let chat = entry.state();
            (chat.session_id.clone(), chat.supports_load_session)
        };
        if let (Some(session_id), true) = (known, can_load) {
            match self.call(link, "session/load", load_session_params(&session_id, cwd)) {
                Ok(_) => {
                    log::info!("loaded copilot session {session_id} for chat {chat_id}");
                    entry.state().session_ready = true;
                    return Ok(session_id);
                }
                Err(err) => log::warn!("could not load copilot session {session_id}: {err}"),
            }
        }

        let result: NewSessionResult =
            serde_json::from_value(self.call(link, "session/new", new_session_params(cwd))?)
                .map_err(|err| AgentError::Protocol(format!("session/new result: {err}")))?;
        let session_id = result
            .session_id
            .ok_or_else(|| AgentError::Protocol("session/new returned no sessionId".to_string()))?;
        {
            let mut chat = entry.state();
            chat.session_id = Some(session_id.clone());
            chat.session_ready = true;
        }
        self.ctx.emit(
            chat_id,
            AgentEvent::SessionId {
                session_id: session_id.clone(),
            },
        );
        Ok(session_id)
    }

    fn abandon(&self, entry: &Entry) {
        if let Some((process, _)) = self.detach(entry, "handshake failed") {
            self.ctx.transport.kill(&process);
        }
    }

    fn detach(&self, entry: &Entry, reason: &str) -> Option<(ProcessId, Vec<AgentEvent>)> {
        let (process, subscription, rpc, leftover) = {
            let mut chat = entry.state();
            let process = chat.process.take()?;
            chat.permissions.clear();
            chat.session_ready = false;
            let mut leftover = chat
                .lines
                .finish()
                .map(|line| chat.parser.parse_line(&line).events)
                .unwrap_or_default();
            leftover.extend(chat.parser.finish_turn());
            (process, chat.subscription.take(), chat.rpc.take(), leftover)
        };
        if let Some(subscription) = subscription {
            self.ctx.transport.unsubscribe(subscription);
        }
        if let Some(rpc) = rpc {
            rpc.reject_all(reason);
        }
        Some((process, leftover))
    }

    /// Wait for `session/prompt` off the caller's thread and close the turn.
    fn await_turn(&self, chat_id: &str, entry: &Entry, link: &Link, prompt: PendingRequest) {
        let ctx = self.ctx.clone();
        let entry = Arc::clone(entry);
        let chat_id = chat_id.to_string();
        let process = link.process.clone();
        let rpc = Arc::clone(&link.rpc);
        thread::spawn(move || {
            let outcome = rpc.wait(prompt, TURN_TIMEOUT);
            let mut events = {
                let mut chat = entry.state();
                if chat.process.as_ref() != Some(&process) {
                    return;
                }
                chat.parser.finish_turn()
            };
            match outcome {
                Ok(result) => {
                    let result: PromptResult = serde_json::from_value(result).unwrap_or_default();
                    log::debug!(
                        "copilot turn for {chat_id} ended: {}",
                        result.stop_reason.as_deref().unwrap_or("unknown")
                    );
                }
                Err(err) => {
                    log::warn!("copilot prompt for {chat_id} failed: {err}");
                    events.push(AgentEvent::info(format!("Error: {err}")));
                }
            }
            events.push(AgentEvent::TurnComplete);
            ctx.emit_all(&chat_id, events);
        });
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
            let (lines, rpc, wire_log) = {
                let mut chat = entry.state();
                if chat.process.as_ref() != Some(process) {
                    return;
                }
                let Some(rpc) = chat.rpc.clone() else {
                    return;
                };
                chat.watch.stdout();
                (chat.lines.push(&chunk), rpc, chat.wire_log.clone())
            };
            for line in lines {
                wire_log.record(Direction::Stdout, &line);
                if rpc.handle_line(&line) {
                    continue;
                }
                handle_agent_line(ctx, chat_id, entry, process, &rpc, &wire_log, &line);
            }
        }
        ProcessEvent::Stderr(line) => {
            log::warn!("copilot stderr [{chat_id}]: {}", line.trim_end());
            let notice = {
                let mut chat = entry.state();
                if chat.process.as_ref() != Some(process) {
                    return;
                }
                chat.wire_log.record(Direction::Stderr, &line);
                chat.watch.stderr(ctx, AgentKind::Copilot, &line)
            };
            if let Some(notice) = notice {
                ctx.emit(chat_id, notice);
            }
        }
        ProcessEvent::Exit(exit) => {
            let (subscription, rpc, mut events) = {
                let mut chat = entry.state();
                if chat.process.as_ref() != Some(process) {
                    log::debug!("ignoring close of stale copilot process {process}");
                    return;
                }
                chat.process = None;
                chat.session_ready = false;
                chat.permissions.clear();
                let mut events = chat
                    .lines
                    .finish()
                    .map(|line| chat.parser.parse_line(&line).events)
                    .unwrap_or_default();
                events.extend(chat.parser.finish_turn());
                events.extend(chat.watch.exit(ctx, AgentKind::Copilot, &exit));
                (chat.subscription.take(), chat.rpc.take(), events)
            };
            if let Some(subscription) = subscription {
                ctx.transport.unsubscribe(subscription);
            }
            if let Some(rpc) = rpc {
                rpc.reject_all("copilot exited");
            }
            log::info!("copilot process {process} for chat {chat_id} exited with {}", exit.code);
            events.push(AgentEvent::Done);
            ctx.emit_all(chat_id, events);
        }
    }
}

fn handle_agent_line(
    ctx: &AgentContext,
    chat_id: &str,
    entry: &Entry,
    process: &ProcessId,
    rpc: &RpcCorrelator,
    wire_log: &WireLog,
    line: &str,
) {
    let (parsed, project) = {
        let mut chat = entry.state();
        let mut parsed = chat.parser.parse_line(line);
        if let Some(permission) = parsed.permission.take() {
            let request_id = id_to_string(&permission.id);
            chat.permissions.insert(request_id, permission);
        }
        (parsed, chat.project.clone())
    };

    if let Some(id) = parsed.unsupported_request {
        let reply = rpc.error_response(id, METHOD_NOT_FOUND, "Method not supported");
        if let Err(err) = write_line(ctx, process, wire_log, &reply) {
            log::warn!("failed to reject copilot request: {err}");
        }
    }

    for event in parsed.events {
        let event = if ctx.approvals.should_auto_approve(project.as_deref(), &event) {
            auto_select(ctx, entry, process, rpc, wire_log, event)
        } else {
            event
        };
        ctx.emit(chat_id, event);
    }
}

/// Answer a permission request with the offered allow option.
fn auto_select(
    ctx: &AgentContext,
    entry: &Entry,
    process: &ProcessId,
    rpc: &RpcCorrelator,
    wire_log: &WireLog,
    event: AgentEvent,
) -> AgentEvent {
    let AgentEvent::ToolApproval { request_id, .. } = &event else {
        return event;
    };
    let Some(permission) = entry.state().permissions.remove(request_id) else {
        return event;
    };
    let option = choose_option(&permission.options, true);
    let reply = rpc.response(permission.id, selected_outcome(&option));
    match write_line(ctx, process, wire_log, &reply) {
        Ok(()) => {
            log::info!("auto-approved copilot permission {request_id} with {option}");
            mark_auto_approved(event)
        }
        Err(err) => {
            log::warn!("failed to auto-approve {request_id}: {err}");
            event
        }
    }
}

impl AgentService for CopilotAgentManager {
    fn send_message(&self, request: SendMessageRequest) -> Result<(), AgentError> {
        let chat_id = request.chat_id.as_str();
        let entry = self.chats.get_or_insert(chat_id);
        let _setup = entry.setup();

        let first_turn = {
            let mut chat = entry.state();
            if request.project_name.is_some() {
                chat.project = request.project_name.clone();
            }
            chat.session_id.is_none() && chat.turns_sent == 0
        };

        let running = entry.state().process.is_some();
        let link = if running {
            self.link(chat_id, &entry)?
        } else {
            match self.start(chat_id, &entry, &request) {
                Ok(link) => link,
                Err(err) => {
                    self.abandon(&entry);
                    return Err(err);
                }
            }
        };

        let ready = entry.state().session_ready;
        let session_id = if ready {
            entry
                .state()
                .session_id
                .clone()
                .ok_or_else(|| AgentError::NoSession(chat_id.to_string()))?
        } else {
            match self.open_session(chat_id, &entry, &link, &request.working_dir) {
                Ok(session_id) => session_id,
                Err(err) => {
                    self.abandon(&entry);
                    return Err(err);
                }
            }
        };

        let prompt = compose_prompt(request.init_prompt.as_deref(), &request.prompt, first_turn);
        entry.state().turns_sent += 1;
        let pending = link.rpc.send_request(
            "session/prompt",
            prompt_params(&session_id, &prompt),
            |line| write_line(&self.ctx, &link.process, &link.wire_log, line),
        )?;
        self.await_turn(chat_id, &entry, &link, pending);
        Ok(())
    }

    fn send_tool_approval(&self, chat_id: &str, decision: ToolApprovalDecision) -> Result<(), AgentError> {
        let entry = self
            .chats
            .get(chat_id)
            .ok_or_else(|| AgentError::NoSession(chat_id.to_string()))?;
        let permission = entry.state().permissions.remove(&decision.request_id);
        let link = self.link(chat_id, &entry)?;

        let (id, options) = match permission {
            Some(permission) => (permission.id, permission.options),
            None => (coerce_id(&decision.request_id), Vec::new()),
        };
        let option = choose_option(&options, decision.approved);
        let reply = link.rpc.response(id, selected_outcome(&option));
        write_line(&self.ctx, &link.process, &link.wire_log, &reply)
    }

    fn interrupt_turn(&self, chat_id: &str) -> Result<(), AgentError> {
        let Some(entry) = self.chats.get(chat_id) else {
            return Ok(());
        };
        let (session_id, abandoned) = {
            let mut chat = entry.state();
            if chat.process.is_none() {
                return Ok(());
            }
            let abandoned: Vec<PendingPermission> =
                chat.permissions.drain().map(|(_, permission)| permission).collect();
            (chat.session_id.clone(), abandoned)
        };
        let Some(session_id) = session_id else {
            return Ok(());
        };
        let link = self.link(chat_id, &entry)?;

        let cancel = link.rpc.notification("session/cancel", cancel_params(&session_id));
        write_line(&self.ctx, &link.process, &link.wire_log, &cancel)?;
        for permission in abandoned {
            let reply = link.rpc.response(permission.id, cancelled_outcome());
            write_line(&self.ctx, &link.process, &link.wire_log, &reply)?;
        }
        Ok(())
    }

    fn stop_chat(&self, chat_id: &str) {
        let Some(entry) = self.chats.get(chat_id) else {
            return;
        };
        if let Some((process, mut events)) = self.detach(&entry, "chat stopped") {
            self.ctx.transport.kill(&process);
            events.push(AgentEvent::Done);
            self.ctx.emit_all(chat_id, events);
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
        let entry = self.chats.get_or_insert(chat_id);
        let mut chat = entry.state();
        chat.session_id = session_id;
        chat.session_ready = false;
    }

    fn remove_chat(&self, chat_id: &str) {
        if let Some(entry) = self.chats.remove(chat_id) {
            if let Some((process, _)) = self.detach(&entry, "chat removed") {
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
