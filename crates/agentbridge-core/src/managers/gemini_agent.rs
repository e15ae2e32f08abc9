//! Gemini adapter: a fresh `gemini -p` process for every turn.
//!
//! The CLI runs pre-authorized, so approvals are no-ops. A clean exit ends
//! the turn; the next message spawns again with `--resume`. Stderr is
//! watched for rate-limit retries and the chat is stopped once the
//! breaker trips.

use std::sync::Arc;

use crate::agents::gemini::{
    approval_mode, breaker_message, GeminiConfig, GeminiParser, RateLimitBreaker, Verdict,
    RATE_LIMIT_THRESHOLD,
};
use crate::agents::{compose_prompt, AgentEvent, AgentKind};
use crate::error::AgentError;
use crate::logging::{Direction, WireLog};
use crate::transport::{ProcessEvent, ProcessId, SubscriptionId};

use super::context::{AgentContext, SpawnWatch};
use super::registry::{ChatEntry, ChatRegistry};
use super::service::{
    AgentService, DoneCallback, EventCallback, SendMessageRequest, ToolApprovalDecision,
};

#[derive(Default)]
struct GeminiChat {
    process: Option<ProcessId>,
    subscription: Option<SubscriptionId>,
    parser: GeminiParser,
    breaker: RateLimitBreaker,
    session_id: Option<String>,
    wire_log: WireLog,
    watch: SpawnWatch,
    turns_sent: u32,
}

type Entry = Arc<ChatEntry<GeminiChat>>;

pub struct GeminiAgentManager {
    ctx: AgentContext,
    chats: ChatRegistry<GeminiChat>,
}

impl GeminiAgentManager {
    pub fn new(ctx: AgentContext) -> Self {
        Self {
            ctx,
            chats: ChatRegistry::new(),
        }
    }
}

/// Kill the running turn, if any, and report `done`.
fn stop(ctx: &AgentContext, chat_id: &str, entry: &Entry) {
    let (process, subscription, leftover) = {
        let mut chat = entry.state();
        let Some(process) = chat.process.take() else {
            return;
        };
        (process, chat.subscription.take(), chat.parser.flush().events)
    };
    if let Some(subscription) = subscription {
        ctx.transport.unsubscribe(subscription);
    }
    ctx.transport.kill(&process);
    log::info!("gemini process {process} for chat {chat_id} stopped");

    let mut events = leftover;
    events.push(AgentEvent::Done);
    ctx.emit_all(chat_id, events);
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
            let events = {
                let mut chat = entry.state();
                if chat.process.as_ref() != Some(process) {
                    return;
                }
                chat.watch.stdout();
                chat.wire_log.record(Direction::Stdout, &chunk);
                let parsed = chat.parser.feed(&chunk);
                if parsed.decoded_lines > 0 {
                    chat.breaker.record_success();
                }
                for event in &parsed.events {
                    if let AgentEvent::SessionId { session_id } = event {
                        chat.session_id = Some(session_id.clone());
                    }
                }
                parsed.events
            };
            ctx.emit_all(chat_id, events);
        }
        ProcessEvent::Stderr(line) => {
            let (verdict, notice) = {
                let mut chat = entry.state();
                if chat.process.as_ref() != Some(process) {
                    return;
                }
                chat.wire_log.record(Direction::Stderr, &line);
                let verdict = chat.breaker.observe_stderr(&line);
                let notice = match verdict {
                    Verdict::Ignored => chat.watch.stderr(ctx, AgentKind::Gemini, &line),
                    _ => None,
                };
                (verdict, notice)
            };
            match verdict {
                Verdict::Ignored => log::warn!("gemini stderr [{chat_id}]: {}", line.trim_end()),
                Verdict::Retrying(streak) => log::warn!(
                    "gemini rate limited for {chat_id} ({streak}/{RATE_LIMIT_THRESHOLD}): {}",
                    line.trim_end()
                ),
                Verdict::Tripped => {
                    log::warn!("gemini rate-limit breaker tripped for {chat_id}");
                    ctx.emit_all(
                        chat_id,
                        [AgentEvent::info(breaker_message()), AgentEvent::TurnComplete],
                    );
                    stop(ctx, chat_id, entry);
                }
                Verdict::AlreadyTripped => {}
            }
            if let Some(notice) = notice {
                ctx.emit(chat_id, notice);
            }
        }
        ProcessEvent::Exit(exit) => {
            let (subscription, mut events) = {
                let mut chat = entry.state();
                if chat.process.as_ref() != Some(process) {
                    log::debug!("ignoring close of stale gemini process {process}");
                    return;
                }
                chat.process = None;
                let mut events = chat.parser.flush().events;
                for event in &events {
                    if let AgentEvent::SessionId { session_id } = event {
                        chat.session_id = Some(session_id.clone());
                    }
                }
                events.extend(chat.watch.exit(ctx, AgentKind::Gemini, &exit));
                (chat.subscription.take(), events)
            };
            if let Some(subscription) = subscription {
                ctx.transport.unsubscribe(subscription);
            }
            log::info!("gemini turn {process} for chat {chat_id} ended with {}", exit.code);
            events.push(AgentEvent::TurnComplete);
            ctx.emit_all(chat_id, events);
        }
    }
}

impl AgentService for GeminiAgentManager {
    fn send_message(&self, request: SendMessageRequest) -> Result<(), AgentError> {
        let chat_id = request.chat_id.as_str();
        let entry = self.chats.get_or_insert(chat_id);
        let _setup = entry.setup();

        let (session_id, first_turn) = {
            let chat = entry.state();
            if chat.process.is_some() {
                return Err(AgentError::Protocol(format!(
                    "a Gemini turn is already running for chat {chat_id}"
                )));
            }
            (
                chat.session_id.clone(),
                chat.session_id.is_none() && chat.turns_sent == 0,
            )
        };

        let spawn = GeminiConfig {
            binary_path: self.ctx.binary_path(AgentKind::Gemini),
            working_dir: request.working_dir.clone(),
            prompt: compose_prompt(request.init_prompt.as_deref(), &request.prompt, first_turn),
            session_id: session_id.clone(),
            model: request.model_version.clone(),
            approval_mode: Some(approval_mode(request.permission_mode.as_deref())),
            shell_prefix: self.ctx.shell_prefix(),
        }
        .build();
        let wire_log = WireLog::open(request.log_dir.as_deref(), chat_id);
        wire_log.record(Direction::Stdin, &spawn.display_command());

        let process = self
            .ctx
            .transport
            .spawn(spawn)
            .map_err(|err| self.ctx.spawn_error(AgentKind::Gemini, err))?;
        self.ctx.availability.mark_available(AgentKind::Gemini);
        {
            let mut chat = entry.state();
            chat.process = Some(process.clone());
            chat.parser = GeminiParser::new(session_id);
            chat.breaker = RateLimitBreaker::new();
            chat.watch = SpawnWatch::default();
            chat.wire_log = wire_log;
            chat.turns_sent += 1;
        }

        let listener = {
            let ctx = self.ctx.clone();
            let entry = Arc::clone(&entry);
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
        log::info!("gemini turn {process} started for chat {chat_id}");
        Ok(())
    }

    fn send_tool_approval(&self, chat_id: &str, decision: ToolApprovalDecision) -> Result<(), AgentError> {
        log::debug!(
            "gemini has no approval channel; ignoring {} for {chat_id}",
            decision.request_id
        );
        Ok(())
    }

    fn interrupt_turn(&self, chat_id: &str) -> Result<(), AgentError> {
        self.stop_chat(chat_id);
        Ok(())
    }

    fn stop_chat(&self, chat_id: &str) {
        if let Some(entry) = self.chats.get(chat_id) {
            stop(&self.ctx, chat_id, &entry);
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
            let detached = {
                let mut chat = entry.state();
                chat.process.take().map(|p| (p, chat.subscription.take()))
            };
            if let Some((process, subscription)) = detached {
                if let Some(subscription) = subscription {
                    self.ctx.transport.unsubscribe(subscription);
                }
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

    const RATE_LIMITED: &str = "Attempt 1 failed with status 429. Retrying with backoff...";

    fn manager() -> (Arc<ScriptedTransport>, GeminiAgentManager, Arc<EventLog>) {
        let transport = ScriptedTransport::new();
        let manager = GeminiAgentManager::new(context(&transport));
        let log = EventLog::new();
        log.attach(&manager, "c1");
        (transport, manager, log)
    }

    fn infos(log: &EventLog) -> usize {
        log.events()
            .iter()
            .filter(|e| matches!(e, AgentEvent::Message { is_info: Some(true), .. }))
            .count()
    }

    fn turn_completes(log: &EventLog) -> usize {
        log.events()
            .iter()
            .filter(|e| **e == AgentEvent::TurnComplete)
            .count()
    }

    mod turns {
        use super::*;

        #[test]
        fn each_turn_spawns_and_resumes() {
            let (transport, manager, log) = manager();
            manager
                .send_message(SendMessageRequest::new("c1", "first", "/repo"))
                .unwrap();
            let first = transport.last_process().unwrap();
            transport.stdout_line(&first, r#"{"type":"init","session_id":"g-1","model":"gemini-2.5-pro"}"#);
            transport.stdout_line(&first, r#"{"type":"message","role":"assistant","content":"Hi","delta":true}"#);
            transport.exit(&first, 0);

            assert_eq!(turn_completes(&log), 1);
            assert_eq!(log.done_count(), 0);
            assert!(!manager.is_running("c1"));
            assert_eq!(manager.session_id("c1").as_deref(), Some("g-1"));

            manager
                .send_message(SendMessageRequest::new("c1", "second", "/repo"))
                .unwrap();
            let (_, spawn) = transport.spawns().pop().unwrap();
            let resume = spawn.args.iter().position(|a| a == "--resume").unwrap();
            assert_eq!(spawn.args[resume + 1], "g-1");
            assert_eq!(transport.spawn_count(), 2);
        }

        #[test]
        fn permission_mode_maps_to_approval_mode() {
            let (transport, manager, _log) = manager();
            manager
                .send_message(SendMessageRequest::new("c1", "hi", "/repo").permission_mode("acceptEdits"))
                .unwrap();
            let (_, spawn) = transport.spawns().pop().unwrap();
            let mode = spawn.args.iter().position(|a| a == "--approval-mode").unwrap();
            assert_eq!(spawn.args[mode + 1], "auto_edit");
        }

        #[test]
        fn overlapping_turn_is_refused() {
            let (transport, manager, _log) = manager();
            manager.send_message(SendMessageRequest::new("c1", "a", "/repo")).unwrap();
            let err = manager
                .send_message(SendMessageRequest::new("c1", "b", "/repo"))
                .unwrap_err();
            assert!(matches!(err, AgentError::Protocol(_)));
            assert_eq!(transport.spawn_count(), 1);
        }

        #[test]
        fn stop_reports_done_instead_of_turn_complete() {
            let (transport, manager, log) = manager();
            manager.send_message(SendMessageRequest::new("c1", "a", "/repo")).unwrap();
            manager.interrupt_turn("c1").unwrap();

            assert_eq!(transport.killed().len(), 1);
            assert_eq!(log.done_count(), 1);
            assert_eq!(turn_completes(&log), 0);
            assert!(manager
                .send_tool_approval("c1", ToolApprovalDecision::allow("x"))
                .is_ok());
        }
    }

    mod breaker {
        use super::*;

        #[test]
        fn ten_signatures_trip_once() {
            let (transport, manager, log) = manager();
            manager.send_message(SendMessageRequest::new("c1", "hi", "/repo")).unwrap();
            let process = transport.last_process().unwrap();

            for _ in 0..RATE_LIMIT_THRESHOLD {
                transport.stderr(&process, RATE_LIMITED);
            }
            assert_eq!(infos(&log), 1);
            assert_eq!(turn_completes(&log), 1);
            assert_eq!(log.done_count(), 1);
            assert_eq!(transport.killed(), vec![process.clone()]);
            assert!(!manager.is_running("c1"));

            let before = log.events().len();
            transport.stderr(&process, RATE_LIMITED);
            assert_eq!(log.events().len(), before);
        }

        #[test]
        fn output_resets_the_streak() {
            let (transport, manager, log) = manager();
            manager.send_message(SendMessageRequest::new("c1", "hi", "/repo")).unwrap();
            let process = transport.last_process().unwrap();

            for _ in 0..RATE_LIMIT_THRESHOLD - 1 {
                transport.stderr(&process, RATE_LIMITED);
            }
            transport.stdout_line(&process, r#"{"type":"message","role":"assistant","content":"ok","delta":true}"#);
            for _ in 0..RATE_LIMIT_THRESHOLD - 1 {
                transport.stderr(&process, RATE_LIMITED);
            }

            assert_eq!(infos(&log), 0);
            assert!(manager.is_running("c1"));
        }
    }

    mod not_installed {
        use super::*;

        #[test]
        fn shell_diagnostic() {
            let (transport, manager, log) = manager();
            manager.send_message(SendMessageRequest::new("c1", "hi", "/repo")).unwrap();
            let process = transport.last_process().unwrap();
            transport.stderr(&process, "bash: gemini: command not found");
            transport.exit(&process, 127);

            assert_eq!(infos(&log), 1);
            assert_eq!(turn_completes(&log), 1);
        }

        #[test]
        fn spawn_failure() {
            let (transport, manager, _log) = manager();
            transport.fail_next_spawn("No such file or directory");
            let err = manager
                .send_message(SendMessageRequest::new("c1", "hi", "/repo"))
                .unwrap_err();
            assert!(matches!(err, AgentError::ToolNotInstalled { agent: AgentKind::Gemini, .. }));
            assert!(!manager.is_running("c1"));
        }
    }

    #[test]
    fn remove_chat_twice() {
        let (transport, manager, _log) = manager();
        manager.send_message(SendMessageRequest::new("c1", "hi", "/repo")).unwrap();
        manager.remove_chat("c1");
        manager.remove_chat("c1");
        assert_eq!(transport.total_listeners(), 0);
        assert_eq!(transport.killed().len(), 1);
    }
}
