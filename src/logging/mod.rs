//! Per-command log capture.
//!
//! Commands log through `tracing` like the rest of the daemon, but each
//! execution also accumulates a plain-text history so the `--verbose` flag
//! can append the full log to the result comment.

use std::fmt::Write as _;
use std::sync::Mutex;

/// A logger scoped to one command execution, tagged `repo#pull`.
///
/// Cheap to share behind an `Arc`; the history buffer is mutex-guarded
/// because executors append from the dispatch task.
#[derive(Debug)]
pub struct CommandLog {
    source: String,
    history: Mutex<String>,
}

impl CommandLog {
    pub fn new(repo_full_name: &str, pull_num: u64) -> Self {
        Self {
            source: format!("{repo_full_name}#{pull_num}"),
            history: Mutex::new(String::new()),
        }
    }

    pub fn debug(&self, msg: impl AsRef<str>) {
        tracing::debug!(source = %self.source, "{}", msg.as_ref());
        self.record("DEBG", msg.as_ref());
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        tracing::info!(source = %self.source, "{}", msg.as_ref());
        self.record("INFO", msg.as_ref());
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        tracing::warn!(source = %self.source, "{}", msg.as_ref());
        self.record("WARN", msg.as_ref());
    }

    pub fn err(&self, msg: impl AsRef<str>) {
        tracing::error!(source = %self.source, "{}", msg.as_ref());
        self.record("EROR", msg.as_ref());
    }

    /// The accumulated history, one line per entry.
    pub fn history(&self) -> String {
        self.history.lock().expect("log history poisoned").clone()
    }

    fn record(&self, level: &str, msg: &str) {
        let mut history = self.history.lock().expect("log history poisoned");
        // writeln! to a String cannot fail
        let _ = writeln!(history, "[{level}] {}: {msg}", self.source);
    }
}
