//! Append-only transcript storage.
//!
//! Every canonical event a chat produces is handed to an [`EventSink`]. The
//! stock implementation, [`JsonlEventSink`], keeps one file per chat:
//!
//! ```text
//! <dir>/
//! ├── <chat-id>.jsonl        # one AgentEvent per line
//! └── ...
//! ```
//!
//! Prompt-style events (approvals, questions, plans) are stored with
//! `"is_processed": true`. A reloaded transcript must not re-open dialogs
//! the user already answered in a previous run.
//!
//! The last stored `sessionId` event is what lets a restarted application
//! resume the agent-side conversation; see
//! [`AgentDispatcher::restore_chat`](crate::managers::AgentDispatcher::restore_chat).

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::agents::event::AgentEvent;
use crate::sync::lock;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where delivered events go to be remembered.
pub trait EventSink: Send + Sync {
    fn append_event(&self, chat_id: &str, event: &AgentEvent) -> Result<(), PersistenceError>;

    /// The most recent session id stored for `chat_id`, if the sink can
    /// read back what it wrote.
    fn last_session_id(&self, _chat_id: &str) -> Result<Option<String>, PersistenceError> {
        Ok(None)
    }
}

/// Sink that forgets everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn append_event(&self, _chat_id: &str, _event: &AgentEvent) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// Stored form of an event: its JSON plus `is_processed` for prompts.
pub fn serialize_event_for_storage(event: &AgentEvent) -> Result<String, PersistenceError> {
    let mut value = serde_json::to_value(event)?;
    if event.is_prompt() {
        if let Value::Object(map) = &mut value {
            map.insert("is_processed".to_string(), Value::Bool(true));
        }
    }
    Ok(serde_json::to_string(&value)?)
}

/// Write `value` as pretty JSON through a temp file and a rename, so a
/// crash mid-write leaves the previous file intact.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    fs::write(&temp, serde_json::to_string_pretty(value)?)?;
    fs::rename(&temp, path)?;
    Ok(())
}

#[derive(Debug)]
pub struct JsonlEventSink {
    dir: PathBuf,
    // Appends from different adapter threads must not interleave mid-line.
    write_lock: Mutex<()>,
}

impl JsonlEventSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, chat_id: &str) -> PathBuf {
        self.dir.join(format!("{chat_id}.jsonl"))
    }

    /// All stored events of a chat, oldest first. A missing transcript is an
    /// empty one. Lines that no longer decode are skipped with a warning.
    pub fn load_events(&self, chat_id: &str) -> Result<Vec<AgentEvent>, PersistenceError> {
        let path = self.path_for(chat_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(fs::File::open(&path)?);
        let mut events = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AgentEvent>(&line) {
                Ok(event) => events.push(event),
                Err(err) => log::warn!("{}:{}: skipping event: {err}", path.display(), index + 1),
            }
        }
        Ok(events)
    }

    /// Drop the transcript of a chat. Missing files are fine.
    pub fn delete(&self, chat_id: &str) -> Result<(), PersistenceError> {
        match fs::remove_file(self.path_for(chat_id)) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }
}

impl EventSink for JsonlEventSink {
    fn append_event(&self, chat_id: &str, event: &AgentEvent) -> Result<(), PersistenceError> {
        let line = serialize_event_for_storage(event)?;
        let _guard = lock(&self.write_lock);
        fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(chat_id))?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn last_session_id(&self, chat_id: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self
            .load_events(chat_id)?
            .into_iter()
            .rev()
            .find_map(|event| match event {
                AgentEvent::SessionId { session_id } => Some(session_id),
                _ => None,
            }))
    }
}
