//! In-memory conversation history, one transcript per key.
//!
//! Each key's history is capped at a number of turns; the oldest turns fall
//! off first. Nothing is persisted.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rig::completion::Message;

use crate::model::Key;

/// Default number of exchanges kept per conversation.
pub const DEFAULT_TURNS: usize = 20;

/// One user message and the assistant's answer to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub user: String,
    pub assistant: String,
}

/// Bounded per-key chat history.
#[derive(Debug)]
pub struct Transcript {
    turns: Mutex<HashMap<Key, VecDeque<Turn>>>,
    max_turns: usize,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new(DEFAULT_TURNS)
    }
}

impl Transcript {
    /// `max_turns = 0` keeps no history at all.
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: Mutex::default(),
            max_turns,
        }
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Key, VecDeque<Turn>>> {
        self.turns.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Turns recorded for `key`, oldest first.
    pub fn turns(&self, key: &Key) -> Vec<Turn> {
        self.lock()
            .get(key)
            .map(|turns| turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// History for `key` as chat messages, oldest first.
    pub fn messages(&self, key: &Key) -> Vec<Message> {
        self.turns(key)
            .into_iter()
            .flat_map(|turn| [Message::user(turn.user), Message::assistant(turn.assistant)])
            .collect()
    }

    /// Append a finished exchange, evicting the oldest beyond the cap.
    pub fn record(&self, key: &Key, user: impl Into<String>, assistant: impl Into<String>) {
        if self.max_turns == 0 {
            return;
        }
        let mut all = self.lock();
        let turns = all.entry(key.clone()).or_default();
        turns.push_back(Turn {
            user: user.into(),
            assistant: assistant.into(),
        });
        while turns.len() > self.max_turns {
            turns.pop_front();
        }
    }

    /// Drop the history for `key`.
    pub fn forget(&self, key: &Key) {
        self.lock().remove(key);
    }

    /// Keys with a recorded history.
    pub fn conversations(&self) -> usize {
        self.lock().len()
    }
}
