//! Owned per-chat state with per-chat locking.
//!
//! Each chat gets a [`ChatEntry`]: a `setup` lock serializing get-or-create
//! and handshakes, and a `state` lock for short bookkeeping. Transport
//! listeners only ever take `state`, and nobody holds `state` across a
//! transport call, so a caller blocked in a handshake cannot starve the
//! listener that delivers its response.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::sync::lock;

#[derive(Default)]
pub struct ChatEntry<S> {
    setup: Mutex<()>,
    state: Mutex<S>,
}

impl<S> ChatEntry<S> {
    pub fn setup(&self) -> MutexGuard<'_, ()> {
        lock(&self.setup)
    }

    pub fn state(&self) -> MutexGuard<'_, S> {
        lock(&self.state)
    }
}

pub struct ChatRegistry<S> {
    chats: Mutex<HashMap<String, Arc<ChatEntry<S>>>>,
}

impl<S> Default for ChatRegistry<S> {
    fn default() -> Self {
        Self {
            chats: Mutex::new(HashMap::new()),
        }
    }
}

impl<S: Default> ChatRegistry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_insert(&self, chat_id: &str) -> Arc<ChatEntry<S>> {
        let mut chats = lock(&self.chats);
        Arc::clone(
            chats
                .entry(chat_id.to_string())
                .or_insert_with(|| Arc::new(ChatEntry::default())),
        )
    }

    pub fn get(&self, chat_id: &str) -> Option<Arc<ChatEntry<S>>> {
        lock(&self.chats).get(chat_id).cloned()
    }

    pub fn remove(&self, chat_id: &str) -> Option<Arc<ChatEntry<S>>> {
        lock(&self.chats).remove(chat_id)
    }

    /// Run `f` on the chat's state if the chat exists.
    pub fn with_state<R>(&self, chat_id: &str, f: impl FnOnce(&mut S) -> R) -> Option<R> {
        let entry = self.get(chat_id)?;
        let mut state = entry.state();
        Some(f(&mut state))
    }

    pub fn len(&self) -> usize {
        lock(&self.chats).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
