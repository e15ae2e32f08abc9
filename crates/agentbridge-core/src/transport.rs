//! Process transport: the spawn / write / subscribe primitives adapters use.
//!
//! Adapters never touch `std::process` directly. They go through
//! [`Transport`], which lets the whole adapter layer run against a scripted
//! transport in tests and against [`LocalTransport`] in production.
//!
//! Each process gets exactly one close event ([`ProcessEvent::Exit`]); after
//! it is delivered the process is forgotten.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::thread;

use crate::error::TransportError;
use crate::spawn::AgentProcess;
use crate::sync::lock;

pub use crate::spawn::{ProcessEvent, ProcessExit, SpawnConfig};

/// Opaque handle to a spawned process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessId(pub String);

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

pub type ProcessListener = Arc<dyn Fn(ProcessEvent) + Send + Sync>;

pub trait Transport: Send + Sync {
    fn spawn(&self, config: SpawnConfig) -> Result<ProcessId, TransportError>;

    /// Write one line to the process's stdin.
    fn write(&self, process: &ProcessId, line: &str) -> Result<(), TransportError>;

    /// Attach a listener for stdout/stderr/exit of `process`.
    fn subscribe(
        &self,
        process: &ProcessId,
        listener: ProcessListener,
    ) -> Result<SubscriptionId, TransportError>;

    fn unsubscribe(&self, subscription: SubscriptionId);

    /// Hard-terminate. The close event is still delivered to listeners.
    fn kill(&self, process: &ProcessId);
}

type Listeners = Arc<Mutex<HashMap<SubscriptionId, ProcessListener>>>;

struct LocalEntry {
    process: AgentProcess,
    listeners: Listeners,
    events: Option<Receiver<ProcessEvent>>,
}

/// [`Transport`] backed by real child processes.
///
/// Events are buffered in the process channel until the first listener is
/// attached, so nothing printed between spawn and subscribe is lost.
#[derive(Default)]
pub struct LocalTransport {
    next_id: AtomicU64,
    processes: Arc<Mutex<HashMap<ProcessId, LocalEntry>>>,
    subscriptions: Mutex<HashMap<SubscriptionId, ProcessId>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn pump(&self, id: ProcessId, events: Receiver<ProcessEvent>, listeners: Listeners) {
        let processes = Arc::clone(&self.processes);
        thread::spawn(move || {
            for event in events.iter() {
                let closing = matches!(event, ProcessEvent::Exit(_));
                let snapshot: Vec<ProcessListener> = lock(&listeners).values().cloned().collect();
                for listener in snapshot {
                    listener(event.clone());
                }
                if closing {
                    break;
                }
            }
            lock(&processes).remove(&id);
            log::debug!("process {id} released");
        });
    }
}

impl Transport for LocalTransport {
    fn spawn(&self, config: SpawnConfig) -> Result<ProcessId, TransportError> {
        log::info!(
            "spawning `{}` in {}",
            config.display_command(),
            config.working_dir.as_deref().unwrap_or(".")
        );
        let mut process = AgentProcess::spawn(&config)?;
        let events = process.take_events();
        let id = ProcessId(format!("proc-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1));
        lock(&self.processes).insert(
            id.clone(),
            LocalEntry {
                process,
                listeners: Arc::default(),
                events,
            },
        );
        Ok(id)
    }

    fn write(&self, process: &ProcessId, line: &str) -> Result<(), TransportError> {
        // A child that stops reading can block this write; the map stays free.
        let stdin = lock(&self.processes)
            .get(process)
            .map(|entry| entry.process.stdin())
            .ok_or_else(|| TransportError::UnknownProcess(process.to_string()))?;
        stdin.write_line(line).map_err(|err| match err {
            TransportError::StdinClosed(_) => TransportError::StdinClosed(process.to_string()),
            other => other,
        })
    }

    fn subscribe(
        &self,
        process: &ProcessId,
        listener: ProcessListener,
    ) -> Result<SubscriptionId, TransportError> {
        let subscription = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let (events, listeners) = {
            let mut processes = lock(&self.processes);
            let entry = processes
                .get_mut(process)
                .ok_or_else(|| TransportError::UnknownProcess(process.to_string()))?;
            lock(&entry.listeners).insert(subscription, listener);
            (entry.events.take(), Arc::clone(&entry.listeners))
        };
        lock(&self.subscriptions).insert(subscription, process.clone());
        if let Some(events) = events {
            self.pump(process.clone(), events, listeners);
        }
        Ok(subscription)
    }

    fn unsubscribe(&self, subscription: SubscriptionId) {
        let Some(process) = lock(&self.subscriptions).remove(&subscription) else {
            return;
        };
        if let Some(entry) = lock(&self.processes).get(&process) {
            lock(&entry.listeners).remove(&subscription);
        }
    }

    fn kill(&self, process: &ProcessId) {
        if let Some(entry) = lock(&self.processes).get(process) {
            log::info!("killing process {process}");
            entry.process.kill();
        }
    }
}
