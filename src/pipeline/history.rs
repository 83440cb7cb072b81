//! Bounded history of confirmed commands

use std::collections::VecDeque;

/// Most recent confirmed commands, oldest first
#[derive(Debug, Clone)]
pub struct CommandHistory {
    entries: VecDeque<String>,
    limit: usize,
}

impl CommandHistory {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit.min(64)),
            limit,
        }
    }

    /// Append, evicting the oldest entry past the limit
    pub fn push(&mut self, command: String) {
        if self.limit == 0 {
            return;
        }
        while self.entries.len() >= self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(command);
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
