//! Local agent processes.
//!
//! An [`AgentProcess`] is one CLI started through the login shell (see
//! [`crate::shell`]). Three background threads feed a single channel:
//! one per output stream, one watching for exit. Lines are delivered as they
//! arrive; the exit event is sent last, after both readers drained (or a short
//! grace period passed), so consumers can flush partial output on exit.
//!
//! Agent-specific command lines are built in their own modules, e.g.
//! [`crate::agents::claude::ClaudeConfig`].

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, ExitStatus, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::error::TransportError;
use crate::shell::login_shell_command;
use crate::sync::lock;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const DRAIN_GRACE_POLLS: u32 = 10;

/// How a process ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessExit {
    pub code: i32,
    pub signal: Option<i32>,
}

impl ProcessExit {
    fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code().unwrap_or(-1),
            signal,
        }
    }

    /// Exit status 127 is what POSIX shells report for an unknown command.
    pub fn is_command_not_found(&self) -> bool {
        self.code == 127
    }
}

/// Output of a running process.
///
/// `Stdout` carries a raw chunk that is not guaranteed to be a whole line;
/// consumers reassemble lines themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Stdout(String),
    Stderr(String),
    Exit(ProcessExit),
}

/// Everything needed to start one agent CLI.
#[derive(Debug, Clone, Default)]
pub struct SpawnConfig {
    pub binary_path: String,
    pub args: Vec<String>,
    pub working_dir: Option<String>,
    /// Overrides the login-shell invocation, e.g. `/bin/zsh -l -c`.
    pub shell_prefix: Option<String>,
    pub env: Vec<(String, String)>,
    /// One-shot CLIs get `/dev/null` on stdin so they never wait for input.
    pub uses_stdin: bool,
}

impl SpawnConfig {
    pub fn new(binary_path: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            args,
            uses_stdin: true,
            ..Self::default()
        }
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Blank prefixes are ignored.
    pub fn shell_prefix(mut self, prefix: Option<String>) -> Self {
        self.shell_prefix = prefix.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn no_stdin(mut self) -> Self {
        self.uses_stdin = false;
        self
    }

    /// The command line as a user would type it, for logs and error messages.
    pub fn display_command(&self) -> String {
        std::iter::once(self.binary_path.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A running agent CLI.
pub struct AgentProcess {
    child: Arc<Mutex<Option<Child>>>,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    events: Option<Receiver<ProcessEvent>>,
}

impl AgentProcess {
    pub fn spawn(config: &SpawnConfig) -> Result<Self, TransportError> {
        let mut cmd = login_shell_command(
            &config.binary_path,
            &config.args,
            config.working_dir.as_deref(),
            config.shell_prefix.as_deref(),
        )?;
        cmd.envs(config.env.iter().map(|(k, v)| (k, v)));
        cmd.stdin(if config.uses_stdin {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|source| TransportError::Spawn {
            command: config.display_command(),
            source,
        })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (tx, rx) = mpsc::channel();
        let drained = Arc::new(AtomicUsize::new(0));
        let mut readers = 0;
        if let Some(stdout) = stdout {
            readers += 1;
            spawn_reader(stdout, tx.clone(), Arc::clone(&drained), |line| {
                ProcessEvent::Stdout(format!("{line}\n"))
            });
        }
        if let Some(stderr) = stderr {
            readers += 1;
            spawn_reader(stderr, tx.clone(), Arc::clone(&drained), ProcessEvent::Stderr);
        }

        let child = Arc::new(Mutex::new(Some(child)));
        let stdin = Arc::new(Mutex::new(stdin));
        watch_exit(Arc::clone(&child), Arc::clone(&stdin), tx, drained, readers);

        Ok(Self {
            child,
            stdin,
            events: Some(rx),
        })
    }

    /// Write one line (a newline is appended) and flush.
    pub fn write_line(&self, line: &str) -> Result<(), TransportError> {
        self.stdin().write_line(line)
    }

    /// A handle that writes to this process without borrowing it.
    pub fn stdin(&self) -> StdinHandle {
        StdinHandle(Arc::clone(&self.stdin))
    }

    /// Take the event stream. Only the first call returns `Some`.
    pub fn take_events(&mut self) -> Option<Receiver<ProcessEvent>> {
        self.events.take()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.child).is_some()
    }

    /// Kill the process immediately. The exit watcher still reports the exit.
    pub fn kill(&self) {
        if let Some(child) = lock(&self.child).as_mut() {
            if let Err(err) = child.kill() {
                log::debug!("kill failed (process likely gone): {err}");
            }
        }
        // A writer stuck on a full pipe holds stdin; the exit watcher closes it later.
        if let Ok(mut stdin) = self.stdin.try_lock() {
            stdin.take();
        }
    }
}

/// Shared access to a child's stdin. Writes to different processes never
/// contend; writes to the same process are serialized.
#[derive(Clone)]
pub struct StdinHandle(Arc<Mutex<Option<ChildStdin>>>);

impl StdinHandle {
    pub fn write_line(&self, line: &str) -> Result<(), TransportError> {
        let mut guard = lock(&self.0);
        let stdin = guard
            .as_mut()
            .ok_or_else(|| TransportError::StdinClosed("agent".to_string()))?;
        writeln!(stdin, "{line}")?;
        stdin.flush()?;
        Ok(())
    }
}

fn spawn_reader<R, F>(stream: R, tx: Sender<ProcessEvent>, drained: Arc<AtomicUsize>, wrap: F)
where
    R: Read + Send + 'static,
    F: Fn(String) -> ProcessEvent + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) => {
                    log::warn!("agent output read failed: {err}");
                    break;
                }
            }
            // Invalid UTF-8 is replaced, never fatal: the pipe must stay drained.
            if tx.send(wrap(decode_line(&buf))).is_err() {
                break;
            }
        }
        drained.fetch_add(1, Ordering::SeqCst);
    });
}

/// One raw output line without its `\n` / `\r\n` terminator.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

fn watch_exit(
    child: Arc<Mutex<Option<Child>>>,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    tx: Sender<ProcessEvent>,
    drained: Arc<AtomicUsize>,
    readers: usize,
) {
    thread::spawn(move || {
        let exit = loop {
            let status = {
                let mut guard = lock(&child);
                let Some(proc) = guard.as_mut() else {
                    break ProcessExit { code: -1, signal: None };
                };
                match proc.try_wait() {
                    Ok(Some(status)) => {
                        guard.take();
                        Some(Ok(status))
                    }
                    Ok(None) => None,
                    Err(err) => {
                        guard.take();
                        Some(Err(err))
                    }
                }
            };
            match status {
                Some(Ok(status)) => break ProcessExit::from_status(status),
                Some(Err(err)) => {
                    log::warn!("failed to poll agent process: {err}");
                    break ProcessExit { code: -1, signal: None };
                }
                None => thread::sleep(EXIT_POLL_INTERVAL),
            }
        };
        lock(&stdin).take();

        // Let the readers forward whatever was still buffered in the pipes.
        for _ in 0..DRAIN_GRACE_POLLS {
            if drained.load(Ordering::SeqCst) >= readers {
                break;
            }
            thread::sleep(EXIT_POLL_INTERVAL / 2);
        }
        let _ = tx.send(ProcessEvent::Exit(exit));
    });
}
