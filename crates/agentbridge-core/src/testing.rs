//! Scripted [`Transport`] for adapter tests.
//!
//! Records every spawn, write and kill. A responder closure can answer writes
//! with stdout lines, which are delivered synchronously to the listeners of
//! the written process, the way a fast agent would reply.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::error::TransportError;
use crate::sync::lock;
use crate::transport::{
    ProcessEvent, ProcessExit, ProcessId, ProcessListener, SpawnConfig, SubscriptionId, Transport,
};

type Responder = Box<dyn Fn(&ProcessId, &str) -> Vec<String> + Send + Sync>;

#[derive(Default)]
struct State {
    next: u64,
    spawns: Vec<(ProcessId, SpawnConfig)>,
    writes: Vec<(ProcessId, String)>,
    killed: Vec<ProcessId>,
    alive: HashSet<ProcessId>,
    listeners: HashMap<ProcessId, HashMap<SubscriptionId, ProcessListener>>,
    subscriptions: HashMap<SubscriptionId, ProcessId>,
    spawn_error: Option<String>,
}

#[derive(Default)]
pub(crate) struct ScriptedTransport {
    state: Mutex<State>,
    responder: Mutex<Option<Arc<Responder>>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&ProcessId, &str) -> Vec<String> + Send + Sync + 'static,
    {
        *lock(&self.responder) = Some(Arc::new(Box::new(responder)));
    }

    /// Make the next spawn fail like a missing executable would.
    pub fn fail_next_spawn(&self, message: &str) {
        lock(&self.state).spawn_error = Some(message.to_string());
    }

    pub fn spawns(&self) -> Vec<(ProcessId, SpawnConfig)> {
        lock(&self.state).spawns.clone()
    }

    pub fn spawn_count(&self) -> usize {
        lock(&self.state).spawns.len()
    }

    pub fn writes(&self) -> Vec<String> {
        lock(&self.state).writes.iter().map(|(_, l)| l.clone()).collect()
    }

    pub fn written_json(&self) -> Vec<serde_json::Value> {
        self.writes()
            .iter()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    }

    pub fn killed(&self) -> Vec<ProcessId> {
        lock(&self.state).killed.clone()
    }

    pub fn last_process(&self) -> Option<ProcessId> {
        lock(&self.state).spawns.last().map(|(id, _)| id.clone())
    }

    pub fn listener_count(&self, process: &ProcessId) -> usize {
        lock(&self.state)
            .listeners
            .get(process)
            .map_or(0, HashMap::len)
    }

    pub fn total_listeners(&self) -> usize {
        lock(&self.state).listeners.values().map(HashMap::len).sum()
    }

    /// Deliver an event to every listener of `process`.
    pub fn emit(&self, process: &ProcessId, event: ProcessEvent) {
        let closing = matches!(event, ProcessEvent::Exit(_));
        let listeners: Vec<ProcessListener> = {
            let mut state = lock(&self.state);
            if closing {
                state.alive.remove(process);
            }
            state
                .listeners
                .get(process)
                .map(|l| l.values().cloned().collect())
                .unwrap_or_default()
        };
        for listener in listeners {
            listener(event.clone());
        }
    }

    pub fn stdout(&self, process: &ProcessId, chunk: &str) {
        self.emit(process, ProcessEvent::Stdout(chunk.to_string()));
    }

    pub fn stdout_line(&self, process: &ProcessId, line: &str) {
        self.stdout(process, &format!("{line}\n"));
    }

    pub fn stderr(&self, process: &ProcessId, line: &str) {
        self.emit(process, ProcessEvent::Stderr(line.to_string()));
    }

    pub fn exit(&self, process: &ProcessId, code: i32) {
        self.emit(process, ProcessEvent::Exit(ProcessExit { code, signal: None }));
    }
}

impl Transport for ScriptedTransport {
    fn spawn(&self, config: SpawnConfig) -> Result<ProcessId, TransportError> {
        let mut state = lock(&self.state);
        if let Some(message) = state.spawn_error.take() {
            return Err(TransportError::Spawn {
                command: config.display_command(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, message),
            });
        }
        state.next += 1;
        let id = ProcessId(format!("proc-{}", state.next));
        state.alive.insert(id.clone());
        state.spawns.push((id.clone(), config));
        Ok(id)
    }

    fn write(&self, process: &ProcessId, line: &str) -> Result<(), TransportError> {
        {
            let mut state = lock(&self.state);
            if !state.alive.contains(process) {
                return Err(TransportError::UnknownProcess(process.to_string()));
            }
            state.writes.push((process.clone(), line.to_string()));
        }
        let responder = lock(&self.responder).clone();
        if let Some(responder) = responder {
            for reply in responder(process, line) {
                self.stdout_line(process, &reply);
            }
        }
        Ok(())
    }

    fn subscribe(
        &self,
        process: &ProcessId,
        listener: ProcessListener,
    ) -> Result<SubscriptionId, TransportError> {
        let mut state = lock(&self.state);
        if !state.alive.contains(process) {
            return Err(TransportError::UnknownProcess(process.to_string()));
        }
        state.next += 1;
        let id = SubscriptionId(state.next);
        state
            .listeners
            .entry(process.clone())
            .or_default()
            .insert(id, listener);
        state.subscriptions.insert(id, process.clone());
        Ok(id)
    }

    fn unsubscribe(&self, subscription: SubscriptionId) {
        let mut state = lock(&self.state);
        if let Some(process) = state.subscriptions.remove(&subscription) {
            if let Some(listeners) = state.listeners.get_mut(&process) {
                listeners.remove(&subscription);
            }
        }
    }

    fn kill(&self, process: &ProcessId) {
        let was_alive = {
            let mut state = lock(&self.state);
            state.killed.push(process.clone());
            state.alive.contains(process)
        };
        if was_alive {
            self.emit(
                process,
                ProcessEvent::Exit(ProcessExit {
                    code: -1,
                    signal: Some(9),
                }),
            );
        }
    }
}

/// Collects everything delivered to a chat observer.
#[derive(Default)]
pub(crate) struct EventLog {
    events: Mutex<Vec<crate::agents::AgentEvent>>,
    done: Mutex<usize>,
}

impl EventLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attach(self: &Arc<Self>, service: &dyn crate::managers::AgentService, chat_id: &str) {
        let events = Arc::clone(self);
        service.on_event(
            chat_id,
            Arc::new(move |event| lock(&events.events).push(event)),
        );
        let done = Arc::clone(self);
        service.on_done(chat_id, Arc::new(move || *lock(&done.done) += 1));
    }

    pub fn events(&self) -> Vec<crate::agents::AgentEvent> {
        lock(&self.events).clone()
    }

    pub fn done_count(&self) -> usize {
        *lock(&self.done)
    }
}

/// An adapter context over `transport` with default settings.
pub(crate) fn context(transport: &Arc<ScriptedTransport>) -> crate::managers::AgentContext {
    crate::managers::AgentContext::new(
        Arc::clone(transport) as Arc<dyn Transport>,
        crate::config::AgentSettings::default(),
    )
}

/// Poll `condition` for up to two seconds.
pub(crate) fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    condition()
}

/// A one-connection-per-request HTTP server answering with the scripted
/// `(status, body)` pairs in order. Each received request line and body is
/// reported on the returned channel.
pub(crate) fn http_stub(
    responses: Vec<(u16, &'static str)>,
) -> (String, std::sync::mpsc::Receiver<(String, String)>) {
    use std::io::{BufRead, BufReader, Read, Write};

    let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        for (status, body) in responses {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            let mut length = 0usize;
            loop {
                let mut header = String::new();
                reader.read_line(&mut header).unwrap();
                if header.trim().is_empty() {
                    break;
                }
                if let Some((name, value)) = header.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        length = value.trim().parse().unwrap();
                    }
                }
            }
            let mut request_body = vec![0; length];
            reader.read_exact(&mut request_body).unwrap();
            let _ = tx.send((
                request_line.trim().to_string(),
                String::from_utf8(request_body).unwrap(),
            ));
            write!(
                stream,
                "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
            .unwrap();
        }
    });
    (base, rx)
}
