use std::{collections::VecDeque, sync::Arc};

use chrono::Local;
use shared::domain::LogEntry;
use tokio::sync::watch;

pub const DEFAULT_LOG_CAPACITY: usize = 10;

const TIMESTAMP_FORMAT: &str = "%H:%M:%S";

/// Ordered, bounded record of transition descriptions, oldest first.
#[derive(Debug, Clone)]
pub struct ActionLog {
    capacity: usize,
    next_id: u64,
    entries: VecDeque<LogEntry>,
}

impl ActionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_id: 1,
            entries: VecDeque::new(),
        }
    }

    /// Appends a fresh entry and evicts the oldest ones past capacity.
    pub fn append(&mut self, message: impl Into<String>) -> LogEntry {
        let entry = LogEntry {
            id: self.next_id,
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            message: message.into(),
        };
        self.next_id += 1;

        self.entries.push_back(entry.clone());
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        entry
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.message.clone()).collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ActionLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

/// An [`ActionLog`] shared between a coordinator's tasks and its readers.
#[derive(Clone)]
pub struct SharedActionLog {
    inner: Arc<watch::Sender<ActionLog>>,
}

impl SharedActionLog {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = watch::channel(ActionLog::new(capacity));
        Self {
            inner: Arc::new(tx),
        }
    }

    pub fn append(&self, message: impl Into<String>) {
        let message = message.into();
        self.inner.send_modify(|log| {
            log.append(message);
        });
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.inner.borrow().entries()
    }

    pub fn messages(&self) -> Vec<String> {
        self.inner.borrow().messages()
    }

    pub fn capacity(&self) -> usize {
        self.inner.borrow().capacity()
    }

    pub fn subscribe(&self) -> watch::Receiver<ActionLog> {
        self.inner.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/action_log_tests.rs"]
mod tests;
