//! Per-chat wire logs.
//!
//! When a chat is started with a log directory, every line exchanged with the
//! agent is appended to `<log_dir>/<chat_id>.log`:
//!
//! ```text
//! [2026-02-04T10:15:30.123Z] STDIN: {"type":"user",...}
//! [2026-02-04T10:15:30.456Z] STDOUT: {"type":"system",...}
//! ```
//!
//! Application diagnostics go through the `log` facade instead.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};

use crate::sync::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Stdin,
    Stdout,
    Stderr,
    Request,
    Response,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Stdin => "STDIN",
            Direction::Stdout => "STDOUT",
            Direction::Stderr => "STDERR",
            Direction::Request => "REQUEST",
            Direction::Response => "RESPONSE",
        }
    }
}

/// Shared handle to an append-only log file. Cloning shares the file.
#[derive(Debug, Clone, Default)]
pub struct WireLog {
    file: Arc<Mutex<Option<File>>>,
}

impl WireLog {
    /// A log that drops everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Open `<log_dir>/<log_id>.log`, creating the directory if needed.
    /// Any failure leaves the log disabled; wire logs are best effort.
    pub fn open(log_dir: Option<&str>, log_id: &str) -> Self {
        let file = log_dir.and_then(|dir| {
            if let Err(err) = std::fs::create_dir_all(dir) {
                log::warn!("cannot create log dir {dir}: {err}");
                return None;
            }
            let path = Path::new(dir).join(format!("{log_id}.log"));
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|err| log::warn!("cannot open {}: {err}", path.display()))
                .ok()
        });
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        lock(&self.file).is_some()
    }

    pub fn record(&self, direction: Direction, data: &str) {
        let mut guard = lock(&self.file);
        let Some(file) = guard.as_mut() else {
            return;
        };
        let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let data = data.trim_end_matches('\n');
        if writeln!(file, "[{ts}] {}: {data}", direction.label())
            .and_then(|_| file.flush())
            .is_err()
        {
            // Stop trying after the first failure (disk full, file removed).
            guard.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_file_in_nested_dir() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("logs/chats");
        let log = WireLog::open(nested.to_str(), "chat-1");

        assert!(log.is_enabled());
        assert!(nested.join("chat-1.log").exists());
    }

    #[test]
    fn no_dir_means_disabled() {
        let log = WireLog::open(None, "chat-1");
        assert!(!log.is_enabled());
        log.record(Direction::Stdin, "ignored");
    }

    #[test]
    fn record_writes_timestamped_lines() {
        let dir = tempdir().unwrap();
        let log = WireLog::open(dir.path().to_str(), "chat-2");
        log.record(Direction::Stdin, "hello\n");
        log.record(Direction::Stderr, "oops");

        let contents = std::fs::read_to_string(dir.path().join("chat-2.log")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("] STDIN: hello"));
        assert!(lines[1].ends_with("] STDERR: oops"));

        let ts = &lines[0][1..25];
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[test]
    fn clones_share_the_file() {
        let dir = tempdir().unwrap();
        let log = WireLog::open(dir.path().to_str(), "chat-3");
        let clone = log.clone();
        log.record(Direction::Request, "a");
        clone.record(Direction::Response, "b");

        let contents = std::fs::read_to_string(dir.path().join("chat-3.log")).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
