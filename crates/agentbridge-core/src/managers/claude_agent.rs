//! Claude adapter: one long-lived `claude` process per chat.
//!
//! The first message spawns the process; follow-up turns are written to its
//! stdin. Permission prompts arrive as `control_request`s and are answered
//! with `control_response`s carrying the input that was asked about.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::agents::claude::{
    interrupt_request, permission_allow, permission_deny, user_message, ClaudeConfig, ClaudeParser,
};
use crate::agents::{compose_prompt, AgentEvent, AgentKind};
use crate::error::AgentError;
use crate::logging::{Direction, WireLog};
use crate::transport::{ProcessEvent, ProcessId, SubscriptionId};

use super::context::{mark_auto_approved, AgentContext, SpawnWatch};
use super::registry::{ChatEntry, ChatRegistry};
use super::service::{
    AgentService, DoneCallback, EventCallback, SendMessageRequest, ToolApprovalDecision,
};

const DEFAULT_DENY_MESSAGE: &str = "User denied permission";

#[derive(Default)]
struct ClaudeChat {
    process: Option<ProcessId>,
    subscription: Option<SubscriptionId>,
    parser: ClaudeParser,
    session_id: Option<String>,
    project: Option<String>,
    wire_log: WireLog,
    watch: SpawnWatch,
    turns_sent: u32,
    /// request id → input of the `can_use_tool` request, echoed on allow.
    pending_inputs: HashMap<String, Value>,
}

type Entry = Arc<ChatEntry<ClaudeChat>>;

pub struct ClaudeAgentManager {
    ctx: AgentContext,
    chats: ChatRegistry<ClaudeChat>,
}

impl ClaudeAgentManager {
    pub fn new(ctx: AgentContext) -> Self {
        Self {
            ctx,
            chats: ChatRegistry::new(),
        }
    }

    fn start(&self, chat_id: &str, entry: &Entry, request: &SendMessageRequest) -> Result<ProcessId, AgentError> {
        let session_id = entry.state().session_id.clone();
        let spawn = ClaudeConfig {
            binary_path: self.ctx.binary_path(AgentKind::Claude),
            working_dir: request.working_dir.clone(),
            session_id,
            model: request.model_version.clone(),
            permission_mode: request.permission_mode.clone(),
            shell_prefix: self.ctx.shell_prefix(),
        }
        .build();

        let process = self
            .ctx
            .transport
            .spawn(spawn)
            .map_err(|err| self.ctx.spawn_error(AgentKind::Claude, err))?;
        self.ctx.availability.mark_available(AgentKind::Claude);

        {
            let mut chat = entry.state();
            chat.process = Some(process.clone());
            chat.wire_log = WireLog::open(request.log_dir.as_deref(), chat_id);
            chat.watch = SpawnWatch::default();
            chat.project = request.project_name.clone();
            let session = chat.session_id.clone();
            chat.parser = ClaudeParser::new();
            chat.parser.set_session_id(session);
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
        log::info!("claude process {process} started for chat {chat_id}");
        Ok(process)
    }

    fn write(&self, chat_id: &str, entry: &Entry, line: &str) -> Result<(), AgentError> {
        let (process, wire_log) = {
            let chat = entry.state();
            let process = chat
                .process
                .clone()
                .ok_or_else(|| AgentError::NoSession(chat_id.to_string()))?;
            (process, chat.wire_log.clone())
        };
        wire_log.record(Direction::Stdin, line);
        self.ctx.transport.write(&process, line)?;
        Ok(())
    }

    /// Forget the current process and its listener. Returns the process and
    /// whatever the parser still held, or `None` if nothing was running.
    fn detach(&self, entry: &Entry) -> Option<(ProcessId, Vec<AgentEvent>)> {
        let (process, subscription, leftover) = {
            let mut chat = entry.state();
            let process = chat.process.take()?;
            chat.pending_inputs.clear();
            (process, chat.subscription.take(), chat.parser.flush())
        };
        if let Some(subscription) = subscription {
            self.ctx.transport.unsubscribe(subscription);
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
            let (events, project, wire_log) = {
                let mut chat = entry.state();
                if chat.process.as_ref() != Some(process) {
                    return;
                }
                chat.watch.stdout();
                let events = chat.parser.feed(&chunk);
                for event in &events {
                    match event {
                        AgentEvent::SessionId { session_id } => {
                            chat.session_id = Some(session_id.clone());
                        }
                        AgentEvent::ToolApproval {
                            request_id, input, ..
                        } => {
                            chat.pending_inputs.insert(request_id.clone(), input.clone());
                        }
                        AgentEvent::Question {
                            request_id,
                            raw_input,
                            ..
                        } => {
                            chat.pending_inputs.insert(request_id.clone(), raw_input.clone());
                        }
                        AgentEvent::PlanApproval {
                            request_id,
                            content,
                        } => {
                            chat.pending_inputs
                                .insert(request_id.clone(), json!({ "plan": content }));
                        }
                        _ => {}
                    }
                }
                (events, chat.project.clone(), chat.wire_log.clone())
            };
            wire_log.record(Direction::Stdout, &chunk);
            for event in events {
                let event = auto_approve(ctx, entry, process, project.as_deref(), &wire_log, event);
                ctx.emit(chat_id, event);
            }
        }
        ProcessEvent::Stderr(line) => {
            log::warn!("claude stderr [{chat_id}]: {}", line.trim_end());
            let notice = {
                let mut chat = entry.state();
                if chat.process.as_ref() != Some(process) {
                    return;
                }
                chat.wire_log.record(Direction::Stderr, &line);
                chat.watch.stderr(ctx, AgentKind::Claude, &line)
            };
            if let Some(notice) = notice {
                ctx.emit(chat_id, notice);
            }
        }
        ProcessEvent::Exit(exit) => {
            let (subscription, mut events) = {
                let mut chat = entry.state();
                if chat.process.as_ref() != Some(process) {
                    log::debug!("ignoring close of stale claude process {process}");
                    return;
                }
                chat.process = None;
                chat.pending_inputs.clear();
                let mut events = chat.parser.flush();
                events.extend(chat.watch.exit(ctx, AgentKind::Claude, &exit));
                (chat.subscription.take(), events)
            };
            if let Some(subscription) = subscription {
                ctx.transport.unsubscribe(subscription);
            }
            log::info!("claude process {process} for chat {chat_id} exited with {}", exit.code);
            events.push(AgentEvent::Done);
            ctx.emit_all(chat_id, events);
        }
    }
}

/// Answer an approval the project already trusts and mark it as such.
fn auto_approve(
    ctx: &AgentContext,
    entry: &Entry,
    process: &ProcessId,
    project: Option<&str>,
    wire_log: &WireLog,
    event: AgentEvent,
) -> AgentEvent {
    if !ctx.approvals.should_auto_approve(project, &event) {
        return event;
    }
    let AgentEvent::ToolApproval {
        request_id,
        name,
        input,
        ..
    } = &event
    else {
        return event;
    };

    let response = permission_allow(request_id, input.clone());
    wire_log.record(Direction::Stdin, &response);
    match ctx.transport.write(process, &response) {
        Ok(()) => {
            log::info!("auto-approved {name} ({request_id})");
            entry.state().pending_inputs.remove(request_id);
            mark_auto_approved(event)
        }
        Err(err) => {
            log::warn!("failed to auto-approve {request_id}: {err}");
            event
        }
    }
}

impl AgentService for ClaudeAgentManager {
    fn send_message(&self, request: SendMessageRequest) -> Result<(), AgentError> {
        let entry = self.chats.get_or_insert(&request.chat_id);
        let _setup = entry.setup();

        let running = entry.state().process.is_some();
        if !running {
            self.start(&request.chat_id, &entry, &request)?;
        }

        let first_turn = {
            let mut chat = entry.state();
            let first = chat.session_id.is_none() && chat.turns_sent == 0;
            chat.turns_sent += 1;
            if request.project_name.is_some() {
                chat.project = request.project_name.clone();
            }
            first
        };
        let prompt = compose_prompt(request.init_prompt.as_deref(), &request.prompt, first_turn);
        self.write(&request.chat_id, &entry, &user_message(&prompt))
    }

    fn send_tool_approval(&self, chat_id: &str, decision: ToolApprovalDecision) -> Result<(), AgentError> {
        let entry = self
            .chats
            .get(chat_id)
            .ok_or_else(|| AgentError::NoSession(chat_id.to_string()))?;
        let recorded = entry.state().pending_inputs.remove(&decision.request_id);

        let line = if decision.approved {
            let input = decision
                .tool_input
                .or(recorded)
                .unwrap_or_else(|| json!({}));
            permission_allow(&decision.request_id, input)
        } else {
            let message = decision
                .deny_message
                .as_deref()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or(DEFAULT_DENY_MESSAGE);
            permission_deny(&decision.request_id, message)
        };
        self.write(chat_id, &entry, &line)
    }

    fn interrupt_turn(&self, chat_id: &str) -> Result<(), AgentError> {
        let Some(entry) = self.chats.get(chat_id) else {
            return Ok(());
        };
        if entry.state().process.is_none() {
            return Ok(());
        }
        self.write(chat_id, &entry, &interrupt_request(&Uuid::new_v4().to_string()))
    }

    fn stop_chat(&self, chat_id: &str) {
        let Some(entry) = self.chats.get(chat_id) else {
            return;
        };
        if let Some((process, mut events)) = self.detach(&entry) {
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
        chat.parser.set_session_id(session_id.clone());
        chat.session_id = session_id;
    }

    fn remove_chat(&self, chat_id: &str) {
        if let Some(entry) = self.chats.remove(chat_id) {
            if let Some((process, _)) = self.detach(&entry) {
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
    use crate::testing::{context, EventLog, ScriptedTransport};
    use crate::transport::ProcessExit;
    use std::thread;

    fn manager() -> (Arc<ScriptedTransport>, Arc<ClaudeAgentManager>) {
        let transport = ScriptedTransport::new();
        let manager = Arc::new(ClaudeAgentManager::new(context(&transport)));
        (transport, manager)
    }

    fn request(prompt: &str) -> SendMessageRequest {
        SendMessageRequest::new("c1", prompt, "/repo")
    }

    const BASH_REQUEST: &str = r#"{"type":"control_request","request_id":"req-1","request":{"subtype":"can_use_tool","tool_name":"Bash","input":{"command":"rm -rf build"}}}"#;

    mod lifecycle {
        use super::*;

        #[test]
        fn concurrent_first_messages_spawn_once() {
            let (transport, manager) = manager();
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let manager = Arc::clone(&manager);
                    thread::spawn(move || manager.send_message(request(&format!("m{i}"))))
                })
                .collect();
            for handle in handles {
                handle.join().unwrap().unwrap();
            }
            assert_eq!(transport.spawn_count(), 1);
            assert_eq!(transport.writes().len(), 8);
        }

        #[test]
        fn follow_ups_reuse_the_process() {
            let (transport, manager) = manager();
            manager
                .send_message(request("first").init_prompt("Be brief."))
                .unwrap();
            manager
                .send_message(request("second").init_prompt("Be brief."))
                .unwrap();

            assert_eq!(transport.spawn_count(), 1);
            let writes = transport.written_json();
            assert_eq!(writes[0]["message"]["content"], "Be brief.\n\nfirst");
            assert_eq!(writes[1]["message"]["content"], "second");
            assert!(manager.is_running("c1"));
        }

        #[test]
        fn known_session_is_resumed() {
            let (transport, manager) = manager();
            manager.set_session_id("c1", Some("sess-9".to_string()));
            manager.send_message(request("hi")).unwrap();
            let (_, spawn) = &transport.spawns()[0];
            let resume = spawn.args.iter().position(|a| a == "--resume").unwrap();
            assert_eq!(spawn.args[resume + 1], "sess-9");
        }

        #[test]
        fn exit_reports_done_once() {
            let (transport, manager) = manager();
            let log = EventLog::new();
            log.attach(manager.as_ref(), "c1");
            manager.send_message(request("hi")).unwrap();
            let process = transport.last_process().unwrap();

            transport.exit(&process, 0);
            transport.exit(&process, 0);

            assert_eq!(log.done_count(), 1);
            assert!(!manager.is_running("c1"));
            assert_eq!(transport.total_listeners(), 0);
        }

        #[test]
        fn close_of_a_replaced_process_is_ignored() {
            let (transport, manager) = manager();
            let log = EventLog::new();
            log.attach(manager.as_ref(), "c1");
            manager.send_message(request("one")).unwrap();
            let old = transport.last_process().unwrap();
            manager.stop_chat("c1");
            manager.send_message(request("two")).unwrap();

            transport.stdout_line(&old, r#"{"type":"result"}"#);
            transport.exit(&old, 0);

            assert!(manager.is_running("c1"));
            assert_eq!(log.done_count(), 1);
            assert!(!log.events().contains(&AgentEvent::TurnComplete));
        }

        #[test]
        fn stop_then_remove_are_idempotent() {
            let (transport, manager) = manager();
            let log = EventLog::new();
            log.attach(manager.as_ref(), "c1");
            manager.send_message(request("hi")).unwrap();
            let process = transport.last_process().unwrap();

            manager.stop_chat("c1");
            manager.stop_chat("c1");
            assert_eq!(transport.killed(), vec![process]);
            assert_eq!(log.done_count(), 1);

            manager.remove_chat("c1");
            manager.remove_chat("c1");
            assert_eq!(manager.session_id("c1"), None);
            assert_eq!(transport.total_listeners(), 0);
        }
    }

    mod streaming {
        use super::*;

        #[test]
        fn result_split_across_chunks() {
            let (transport, manager) = manager();
            let log = EventLog::new();
            log.attach(manager.as_ref(), "c1");
            manager.send_message(request("hi")).unwrap();
            let process = transport.last_process().unwrap();

            transport.stdout(&process, r#"{"type":"resu"#);
            transport.stdout(&process, "lt\"}\n");

            let completes = log
                .events()
                .into_iter()
                .filter(|e| *e == AgentEvent::TurnComplete)
                .count();
            assert_eq!(completes, 1);
        }

        #[test]
        fn session_id_is_captured() {
            let (transport, manager) = manager();
            manager.send_message(request("hi")).unwrap();
            let process = transport.last_process().unwrap();
            transport.stdout_line(
                &process,
                r#"{"type":"system","subtype":"init","session_id":"s-42"}"#,
            );
            assert_eq!(manager.session_id("c1").as_deref(), Some("s-42"));
        }
    }

    mod approvals {
        use super::*;

        #[test]
        fn allow_echoes_the_requested_input() {
            let (transport, manager) = manager();
            let log = EventLog::new();
            log.attach(manager.as_ref(), "c1");
            manager.send_message(request("hi")).unwrap();
            transport.stdout_line(&transport.last_process().unwrap(), BASH_REQUEST);

            let request_id = log
                .events()
                .into_iter()
                .find_map(|e| match e {
                    AgentEvent::ToolApproval { request_id, .. } => Some(request_id),
                    _ => None,
                })
                .unwrap();
            manager
                .send_tool_approval("c1", ToolApprovalDecision::allow(&request_id))
                .unwrap();

            let reply = transport.written_json().pop().unwrap();
            assert_eq!(
                reply,
                serde_json::from_str::<Value>(&permission_allow(
                    "req-1",
                    json!({"command": "rm -rf build"})
                ))
                .unwrap()
            );
        }

        #[test]
        fn deny_has_a_default_message() {
            let (transport, manager) = manager();
            manager.send_message(request("hi")).unwrap();
            transport.stdout_line(&transport.last_process().unwrap(), BASH_REQUEST);
            manager
                .send_tool_approval("c1", ToolApprovalDecision::deny("req-1"))
                .unwrap();

            let reply = transport.written_json().pop().unwrap();
            assert_eq!(reply["response"]["request_id"], "req-1");
            assert_eq!(reply["response"]["response"]["behavior"], "deny");
            assert_eq!(reply["response"]["response"]["message"], DEFAULT_DENY_MESSAGE);
        }

        #[test]
        fn safe_commands_are_answered_without_the_observer() {
            let (transport, manager) = manager();
            let log = EventLog::new();
            log.attach(manager.as_ref(), "c1");
            manager.send_message(request("hi")).unwrap();
            transport.stdout_line(
                &transport.last_process().unwrap(),
                r#"{"type":"control_request","request_id":"req-7","request":{"subtype":"can_use_tool","tool_name":"Bash","input":{"command":"git status"}}}"#,
            );

            assert!(!log.events().iter().any(AgentEvent::is_prompt));
            let reply = transport.written_json().pop().unwrap();
            assert_eq!(reply["response"]["request_id"], "req-7");
            assert_eq!(reply["response"]["response"]["behavior"], "allow");
        }

        #[test]
        fn approval_without_process_is_an_error() {
            let (_transport, manager) = manager();
            let err = manager
                .send_tool_approval("c1", ToolApprovalDecision::allow("x"))
                .unwrap_err();
            assert!(matches!(err, AgentError::NoSession(_)));
        }

        #[test]
        fn interrupt_writes_control_request() {
            let (transport, manager) = manager();
            manager.interrupt_turn("c1").unwrap();
            assert!(transport.writes().is_empty());

            manager.send_message(request("hi")).unwrap();
            manager.interrupt_turn("c1").unwrap();
            let interrupt = transport.written_json().pop().unwrap();
            assert_eq!(interrupt["type"], "control_request");
            assert_eq!(interrupt["request"]["subtype"], "interrupt");
        }
    }

    mod not_installed {
        use super::*;

        #[test]
        fn spawn_failure() {
            let (transport, manager) = manager();
            transport.fail_next_spawn("No such file or directory");
            let err = manager.send_message(request("hi")).unwrap_err();
            assert!(matches!(err, AgentError::ToolNotInstalled { agent: AgentKind::Claude, .. }));
            assert!(!manager.is_running("c1"));
        }

        #[test]
        fn shell_diagnostic_and_exit_127_report_once() {
            let (transport, manager) = manager();
            let log = EventLog::new();
            log.attach(manager.as_ref(), "c1");
            manager.send_message(request("hi")).unwrap();
            let process = transport.last_process().unwrap();

            transport.stderr(&process, "zsh:1: command not found: claude");
            transport.emit(
                &process,
                ProcessEvent::Exit(ProcessExit {
                    code: 127,
                    signal: None,
                }),
            );

            let infos = log
                .events()
                .into_iter()
                .filter(|e| matches!(e, AgentEvent::Message { is_info: Some(true), .. }))
                .count();
            assert_eq!(infos, 1);
            assert_eq!(log.done_count(), 1);
        }
    }
}
