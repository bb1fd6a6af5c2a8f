//! Sliding-window match of recent notes against the target melody

use std::collections::VecDeque;

/// Outcome of one push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    Matched,
    NoMatch,
}

/// Remembers the last `target.len()` symbols and reports when they equal the
/// target
///
/// Only the newest window matters: older notes are dropped as soon as they
/// fall out of it. A match does not clear the window, so a later push matches
/// again only if the newest window re-forms the target.
#[derive(Debug, Clone)]
pub struct SequenceMatcher {
    target: Vec<String>,
    window: VecDeque<String>,
    matches: u64,
}

impl SequenceMatcher {
    pub fn new(target: Vec<String>) -> Self {
        let capacity = target.len();
        Self {
            target,
            window: VecDeque::with_capacity(capacity + 1),
            matches: 0,
        }
    }

    pub fn push(&mut self, symbol: &str) -> MatchResult {
        self.window.push_back(symbol.to_string());
        while self.window.len() > self.target.len() {
            self.window.pop_front();
        }

        if self.window.len() == self.target.len() && self.window.iter().eq(self.target.iter()) {
            self.matches += 1;
            MatchResult::Matched
        } else {
            MatchResult::NoMatch
        }
    }

    /// Current window, oldest first
    pub fn window(&self) -> Vec<&str> {
        self.window.iter().map(String::as_str).collect()
    }

    /// Matches reported since creation
    pub fn matches(&self) -> u64 {
        self.matches
    }
}
