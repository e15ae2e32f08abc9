//! Codex adapter: a `codex app-server` process per chat speaking bare
//! JSON-RPC.
//!
//! Each process is initialized once, then bound to a thread (`thread/resume`
//! when a thread id survives from an earlier process, `thread/start`
//! otherwise). Every user message is one `turn/start`. Approvals are server
//! requests answered with `{decision}` under the request's own id.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::agents::codex::{
    approval_decision, approval_policy, initialize_params, thread_resume_params,
    thread_start_params, turn_interrupt_params, turn_start_params, CodexConfig, CodexParser,
    ThreadResult, TurnResult,
};
use crate::agents::line_buffer::LineBuffer;
use crate::agents::rpc::{coerce_id, RpcCorrelator, RpcDialect};
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

#[derive(Default)]
struct CodexChat {
    process: Option<ProcessId>,
    subscription: Option<SubscriptionId>,
    rpc: Option<Arc<RpcCorrelator>>,
    lines: LineBuffer,
    parser: CodexParser,
    thread_id: Option<String>,
    /// Set by `turn/start`, needed for `turn/interrupt`.
    turn_id: Option<String>,
    /// The thread was bound on the current process.
    thread_ready: bool,
    project: Option<String>,
    wire_log: WireLog,
    watch: SpawnWatch,
    turns_sent: u32,
    /// request id → approval tool name.
    approvals: HashMap<String, String>,
}

type Entry = Arc<ChatEntry<CodexChat>>;

/// What a caller needs to talk to the current process without the lock.
struct Link {
    process: ProcessId,
    rpc: Arc<RpcCorrelator>,
    wire_log: WireLog,
}

pub struct CodexAgentManager {
    ctx: AgentContext,
    chats: ChatRegistry<CodexChat>,
}

fn write_line(
    ctx: &AgentContext,
    process: &ProcessId,
    wire_log: &WireLog,
    line: &str,
) -> Result<(), AgentError> {
    log::debug!("codex <- {line}");
    wire_log.record(Direction::Stdin, line);
    ctx.transport.write(process, line)?;
    Ok(())
}

impl CodexAgentManager {
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
        let spawn = CodexConfig {
            binary_path: self.ctx.binary_path(AgentKind::Codex),
            working_dir: request.working_dir.clone(),
            model: request.model_version.clone(),
            shell_prefix: self.ctx.shell_prefix(),
        }
        .build();
        let process = self
            .ctx
            .transport
            .spawn(spawn)
            .map_err(|err| self.ctx.spawn_error(AgentKind::Codex, err))?;
        self.ctx.availability.mark_available(AgentKind::Codex);

        let rpc = Arc::new(RpcCorrelator::new(RpcDialect::Bare));
        let wire_log = WireLog::open(request.log_dir.as_deref(), chat_id);
        {
            let mut chat = entry.state();
            chat.process = Some(process.clone());
            chat.rpc = Some(Arc::clone(&rpc));
            chat.lines = LineBuffer::new();
            chat.parser = CodexParser::new();
            chat.turn_id = None;
            chat.thread_ready = false;
            chat.wire_log = wire_log.clone();
            chat.watch = SpawnWatch::default();
            chat.approvals.clear();
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
        log::info!("codex app-server {process} started for chat {chat_id}");

        let link = Link {
            process,
            rpc,
            wire_log,
        };
        self.call(&link, "initialize", initialize_params())?;
        write_line(
            &self.ctx,
            &link.process,
            &link.wire_log,
            &link.rpc.notification("initialized", json!({})),
        )?;
        Ok(link)
    }

    /// Bind the process to a thread, resuming the known one if possible.
    fn open_thread(&self, chat_id: &str, entry: &Entry, link: &Link, request: &SendMessageRequest) -> Result<String, AgentError> {
        let known = entry.state().thread_id.clone();
        if let Some(thread_id) = known {
            match self.call(link, "thread/resume", thread_resume_params(&thread_id)) {
                Ok(_) => {
                    log::info!("resumed codex thread {thread_id} for chat {chat_id}");
                    entry.state().thread_ready = true;
                    return Ok(thread_id);
                }
                Err(err) => log::warn!("could not resume codex thread {thread_id}: {err}"),
            }
        }

        let params = thread_start_params(
            &request.working_dir,
            approval_policy(request.permission_mode.as_deref()),
            request.model_version.as_deref(),
        );
        let result: ThreadResult = serde_json::from_value(self.call(link, "thread/start", params)?)
            .map_err(|err| AgentError::Protocol(format!("thread/start result: {err}")))?;
        let thread_id = result
            .thread
            .and_then(|thread| thread.id)
            .ok_or_else(|| AgentError::Protocol("thread/start returned no thread id".to_string()))?;
        {
            let mut chat = entry.state();
            chat.thread_id = Some(thread_id.clone());
            chat.thread_ready = true;
        }
        self.ctx.emit(
            chat_id,
            AgentEvent::SessionId {
                session_id: thread_id.clone(),
            },
        );
        Ok(thread_id)
    }

    /// Tear down the handshake leftovers after a failed start.
    fn abandon(&self, entry: &Entry) {
        if let Some((process, _)) = self.detach(entry, "handshake failed") {
            self.ctx.transport.kill(&process);
        }
    }

    fn detach(&self, entry: &Entry, reason: &str) -> Option<(ProcessId, Vec<AgentEvent>)> {
        let (process, subscription, rpc, leftover) = {
            let mut chat = entry.state();
            let process = chat.process.take()?;
            chat.approvals.clear();
            chat.thread_ready = false;
            chat.turn_id = None;
            let leftover = chat
                .lines
                .finish()
                .map(|line| chat.parser.parse_line(&line).events)
                .unwrap_or_default();
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
                handle_server_line(ctx, chat_id, entry, process, &rpc, &wire_log, &line);
            }
        }
        ProcessEvent::Stderr(line) => {
            log::warn!("codex stderr [{chat_id}]: {}", line.trim_end());
            let notice = {
                let mut chat = entry.state();
                if chat.process.as_ref() != Some(process) {
                    return;
                }
                chat.wire_log.record(Direction::Stderr, &line);
                chat.watch.stderr(ctx, AgentKind::Codex, &line)
            };
            if let Some(notice) = notice {
                ctx.emit(chat_id, notice);
            }
        }
        ProcessEvent::Exit(exit) => {
            let (subscription, rpc, mut events) = {
                let mut chat = entry.state();
                if chat.process.as_ref() != Some(process) {
                    log::debug!("ignoring close of stale codex process {process}");
                    return;
                }
                chat.process = None;
                chat.thread_ready = false;
                chat.turn_id = None;
                chat.approvals.clear();
                let mut events = chat
                    .lines
                    .finish()
                    .map(|line| chat.parser.parse_line(&line).events)
                    .unwrap_or_default();
                events.extend(chat.watch.exit(ctx, AgentKind::Codex, &exit));
                (chat.subscription.take(), chat.rpc.take(), events)
            };
            if let Some(subscription) = subscription {
                ctx.transport.unsubscribe(subscription);
            }
            if let Some(rpc) = rpc {
                rpc.reject_all("codex app-server exited");
            }
            log::info!("codex process {process} for chat {chat_id} exited with {}", exit.code);
            events.push(AgentEvent::Done);
            ctx.emit_all(chat_id, events);
        }
    }
}

/// A notification or server request that the correlator did not consume.
fn handle_server_line(
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
        let parsed = chat.parser.parse_line(line);
        for event in &parsed.events {
            if let AgentEvent::ToolApproval {
                request_id, name, ..
            } = event
            {
                chat.approvals.insert(request_id.clone(), name.clone());
            }
        }
        (parsed, chat.project.clone())
    };

    if let Some(id) = parsed.unsupported_request {
        log::warn!("codex server request not supported: {line}");
        let reply = rpc.error_response(id, METHOD_NOT_FOUND, "Method not supported");
        if let Err(err) = write_line(ctx, process, wire_log, &reply) {
            log::warn!("failed to reject codex request: {err}");
        }
    }

    for event in parsed.events {
        let event = if ctx.approvals.should_auto_approve(project.as_deref(), &event) {
            auto_accept(ctx, entry, process, rpc, wire_log, event)
        } else {
            event
        };
        ctx.emit(chat_id, event);
    }
}

fn auto_accept(
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
    let reply = rpc.response(coerce_id(request_id), approval_decision(true));
    match write_line(ctx, process, wire_log, &reply) {
        Ok(()) => {
            log::info!("auto-approved codex request {request_id}");
            entry.state().approvals.remove(request_id);
            mark_auto_approved(event)
        }
        Err(err) => {
            log::warn!("failed to auto-approve {request_id}: {err}");
            event
        }
    }
}

impl AgentService for CodexAgentManager {
    fn send_message(&self, request: SendMessageRequest) -> Result<(), AgentError> {
        let chat_id = request.chat_id.as_str();
        let entry = self.chats.get_or_insert(chat_id);
        let _setup = entry.setup();

        let first_turn = {
            let mut chat = entry.state();
            if request.project_name.is_some() {
                chat.project = request.project_name.clone();
            }
            chat.thread_id.is_none() && chat.turns_sent == 0
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

        let ready = entry.state().thread_ready;
        let thread_id = if ready {
            entry
                .state()
                .thread_id
                .clone()
                .ok_or_else(|| AgentError::NoSession(chat_id.to_string()))?
        } else {
            match self.open_thread(chat_id, &entry, &link, &request) {
                Ok(thread_id) => thread_id,
                Err(err) => {
                    self.abandon(&entry);
                    return Err(err);
                }
            }
        };

        let prompt = compose_prompt(request.init_prompt.as_deref(), &request.prompt, first_turn);
        entry.state().turns_sent += 1;
        let result = self.call(&link, "turn/start", turn_start_params(&thread_id, &prompt))?;
        match serde_json::from_value::<TurnResult>(result) {
            Ok(TurnResult { turn: Some(turn) }) => entry.state().turn_id = turn.id,
            Ok(_) => log::debug!("turn/start returned no turn id"),
            Err(err) => log::debug!("unexpected turn/start result: {err}"),
        }
        Ok(())
    }

    fn send_tool_approval(&self, chat_id: &str, decision: ToolApprovalDecision) -> Result<(), AgentError> {
        let entry = self
            .chats
            .get(chat_id)
            .ok_or_else(|| AgentError::NoSession(chat_id.to_string()))?;
        let kind = entry.state().approvals.remove(&decision.request_id);
        let link = self.link(chat_id, &entry)?;

        let result = match (kind.as_deref(), decision.approved, decision.tool_input) {
            (Some("UserInput"), true, Some(answers)) => answers,
            (_, approved, _) => approval_decision(approved),
        };
        let reply = link.rpc.response(coerce_id(&decision.request_id), result);
        write_line(&self.ctx, &link.process, &link.wire_log, &reply)
    }

    fn interrupt_turn(&self, chat_id: &str) -> Result<(), AgentError> {
        let Some(entry) = self.chats.get(chat_id) else {
            return Ok(());
        };
        let ids = {
            let chat = entry.state();
            chat.thread_id.clone().zip(chat.turn_id.clone())
        };
        let Some((thread_id, turn_id)) = ids else {
            return Ok(());
        };
        let Ok(link) = self.link(chat_id, &entry) else {
            return Ok(());
        };
        // The response is consumed by the correlator; nobody waits on it.
        link.rpc.send_request(
            "turn/interrupt",
            turn_interrupt_params(&thread_id, &turn_id),
            |line| write_line(&self.ctx, &link.process, &link.wire_log, line),
        )?;
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
        self.chats.with_state(chat_id, |chat| chat.thread_id.clone()).flatten()
    }

    fn set_session_id(&self, chat_id: &str, session_id: Option<String>) {
        let entry = self.chats.get_or_insert(chat_id);
        let mut chat = entry.state();
        chat.thread_id = session_id;
        chat.thread_ready = false;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, wait_until, EventLog, ScriptedTransport};
    use std::thread;

    /// A well-behaved app-server: answers the handshake and streams a delta
    /// after `turn/start`.
    fn serve(transport: &ScriptedTransport) {
        transport.respond_with(|_, line| {
            let request: Value = serde_json::from_str(line).unwrap_or_default();
            let id = request["id"].clone();
            match request["method"].as_str() {
                Some("initialize") => vec![json!({"id": id, "result": {}}).to_string()],
                Some("thread/start") => {
                    vec![json!({"id": id, "result": {"thread": {"id": "th-1"}}}).to_string()]
                }
                Some("thread/resume") => vec![json!({
                    "id": id,
                    "error": {"code": -32600, "message": "thread not found"}
                })
                .to_string()],
                Some("turn/start") => vec![
                    json!({"id": id, "result": {"turn": {"id": "tu-1"}}}).to_string(),
                    json!({"method": "item/agentMessage/delta", "params": {"delta": "Hi"}})
                        .to_string(),
                ],
                _ => Vec::new(),
            }
        });
    }

    fn manager() -> (Arc<ScriptedTransport>, Arc<CodexAgentManager>) {
        let transport = ScriptedTransport::new();
        let manager = Arc::new(CodexAgentManager::new(context(&transport)));
        (transport, manager)
    }

    fn methods(transport: &ScriptedTransport) -> Vec<String> {
        transport
            .written_json()
            .iter()
            .filter_map(|m| m["method"].as_str().map(str::to_string))
            .collect()
    }

    mod handshake {
        use super::*;

        #[test]
        fn fresh_chat_runs_the_full_sequence() {
            let (transport, manager) = manager();
            serve(&transport);
            let log = EventLog::new();
            log.attach(manager.as_ref(), "c1");

            manager
                .send_message(SendMessageRequest::new("c1", "hi", "/tmp"))
                .unwrap();

            assert_eq!(transport.spawn_count(), 1);
            assert_eq!(
                methods(&transport),
                ["initialize", "initialized", "thread/start", "turn/start"]
            );
            let writes = transport.written_json();
            assert!(writes.iter().all(|m| m.get("jsonrpc").is_none()));
            assert_eq!(writes[2]["params"]["cwd"], "/tmp");
            assert_eq!(writes[3]["params"]["threadId"], "th-1");

            let events = log.events();
            let session = events
                .iter()
                .position(|e| matches!(e, AgentEvent::SessionId { session_id } if session_id == "th-1"))
                .unwrap();
            let text = events
                .iter()
                .position(|e| matches!(e, AgentEvent::Text { .. }))
                .unwrap();
            assert!(session < text);
            assert_eq!(manager.session_id("c1").as_deref(), Some("th-1"));
        }

        #[test]
        fn second_turn_skips_the_handshake() {
            let (transport, manager) = manager();
            serve(&transport);
            manager.send_message(SendMessageRequest::new("c1", "one", "/tmp")).unwrap();
            manager.send_message(SendMessageRequest::new("c1", "two", "/tmp")).unwrap();

            assert_eq!(transport.spawn_count(), 1);
            assert_eq!(
                methods(&transport),
                ["initialize", "initialized", "thread/start", "turn/start", "turn/start"]
            );
        }

        #[test]
        fn failed_resume_falls_back_to_a_new_thread() {
            let (transport, manager) = manager();
            serve(&transport);
            manager.set_session_id("c1", Some("th-old".to_string()));

            manager.send_message(SendMessageRequest::new("c1", "hi", "/tmp")).unwrap();

            assert_eq!(
                methods(&transport),
                ["initialize", "initialized", "thread/resume", "thread/start", "turn/start"]
            );
            assert_eq!(manager.session_id("c1").as_deref(), Some("th-1"));
        }

        #[test]
        fn init_prompt_only_on_a_fresh_conversation() {
            let (transport, manager) = manager();
            serve(&transport);
            let request = |p: &str| SendMessageRequest::new("c1", p, "/tmp").init_prompt("Rules.");
            manager.send_message(request("one")).unwrap();
            manager.send_message(request("two")).unwrap();

            let turns: Vec<Value> = transport
                .written_json()
                .into_iter()
                .filter(|m| m["method"] == "turn/start")
                .collect();
            assert_eq!(turns[0]["params"]["input"][0]["text"], "Rules.\n\none");
            assert_eq!(turns[1]["params"]["input"][0]["text"], "two");
        }

        #[test]
        fn stop_settles_a_request_stuck_in_the_handshake() {
            let (transport, manager) = manager();
            let sender = Arc::clone(&manager);
            let handle = thread::spawn(move || {
                sender.send_message(SendMessageRequest::new("c1", "hi", "/tmp"))
            });

            assert!(wait_until(|| transport.writes().len() == 1));
            manager.stop_chat("c1");

            let err = handle.join().unwrap().unwrap_err();
            assert!(matches!(err, AgentError::RequestRejected { .. }));
            assert!(!manager.is_running("c1"));
        }
    }

    mod server_requests {
        use super::*;

        fn running() -> (Arc<ScriptedTransport>, Arc<CodexAgentManager>, Arc<EventLog>) {
            let (transport, manager) = manager();
            serve(&transport);
            let log = EventLog::new();
            log.attach(manager.as_ref(), "c1");
            manager.send_message(SendMessageRequest::new("c1", "hi", "/tmp")).unwrap();
            (transport, manager, log)
        }

        #[test]
        fn approval_echoes_numeric_id() {
            let (transport, manager, log) = running();
            transport.stdout_line(
                &transport.last_process().unwrap(),
                r#"{"id":7,"method":"item/commandExecution/requestApproval","params":{"command":"rm -rf dist"}}"#,
            );
            let request_id = log
                .events()
                .into_iter()
                .find_map(|e| match e {
                    AgentEvent::ToolApproval { request_id, .. } => Some(request_id),
                    _ => None,
                })
                .unwrap();
            assert_eq!(request_id, "7");

            manager
                .send_tool_approval("c1", ToolApprovalDecision::allow(&request_id))
                .unwrap();
            assert_eq!(
                transport.written_json().pop().unwrap(),
                json!({"id": 7, "result": {"decision": "accept"}})
            );
        }

        #[test]
        fn decline() {
            let (transport, manager, _log) = running();
            transport.stdout_line(
                &transport.last_process().unwrap(),
                r#"{"id":8,"method":"item/fileChange/requestApproval","params":{}}"#,
            );
            manager
                .send_tool_approval("c1", ToolApprovalDecision::deny("8"))
                .unwrap();
            assert_eq!(
                transport.written_json().pop().unwrap(),
                json!({"id": 8, "result": {"decision": "decline"}})
            );
        }

        #[test]
        fn safe_command_is_accepted_without_prompting() {
            let (transport, _manager, log) = running();
            transport.stdout_line(
                &transport.last_process().unwrap(),
                r#"{"id":11,"method":"item/commandExecution/requestApproval","params":{"command":"git status"}}"#,
            );
            assert!(!log.events().iter().any(AgentEvent::is_prompt));
            assert_eq!(
                transport.written_json().pop().unwrap(),
                json!({"id": 11, "result": {"decision": "accept"}})
            );
        }

        #[test]
        fn unsupported_request_is_rejected() {
            let (transport, _manager, _log) = running();
            transport.stdout_line(
                &transport.last_process().unwrap(),
                r#"{"id":9,"method":"account/login","params":{}}"#,
            );
            assert_eq!(
                transport.written_json().pop().unwrap(),
                json!({"id": 9, "error": {"code": -32601, "message": "Method not supported"}})
            );
        }

        #[test]
        fn interrupt_uses_turn_id() {
            let (transport, manager, _log) = running();
            manager.interrupt_turn("c1").unwrap();
            let interrupt = transport.written_json().pop().unwrap();
            assert_eq!(interrupt["method"], "turn/interrupt");
            assert_eq!(interrupt["params"], json!({"threadId": "th-1", "turnId": "tu-1"}));
        }
    }

    mod teardown {
        use super::*;

        #[test]
        fn exit_emits_done_and_keeps_thread() {
            let (transport, manager) = manager();
            serve(&transport);
            let log = EventLog::new();
            log.attach(manager.as_ref(), "c1");
            manager.send_message(SendMessageRequest::new("c1", "hi", "/tmp")).unwrap();

            transport.exit(&transport.last_process().unwrap(), 1);

            assert_eq!(log.done_count(), 1);
            assert!(!manager.is_running("c1"));
            assert_eq!(manager.session_id("c1").as_deref(), Some("th-1"));
        }

        #[test]
        fn remove_chat_twice() {
            let (transport, manager) = manager();
            serve(&transport);
            manager.send_message(SendMessageRequest::new("c1", "hi", "/tmp")).unwrap();

            manager.remove_chat("c1");
            manager.remove_chat("c1");

            assert_eq!(transport.killed().len(), 1);
            assert_eq!(transport.total_listeners(), 0);
            assert_eq!(manager.session_id("c1"), None);
        }
    }
}
