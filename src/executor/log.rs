//! Ordered, shared console log of one run.

use parking_lot::Mutex;
use std::sync::Arc;

/// Console log shared between the step executor and the controller
#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    lines: Arc<Mutex<Vec<String>>>,
}

impl LogBuffer {
    /// Creates an empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one line
    pub fn push(&self, line: impl Into<String>) {
        self.lines.lock().push(line.into());
    }

    /// Number of lines captured
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    /// Returns true if nothing was captured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    /// Snapshot of every line
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Last `max_lines` lines, oldest first
    #[must_use]
    pub fn tail(&self, max_lines: usize) -> Vec<String> {
        let lines = self.lines.lock();
        let start = lines.len().saturating_sub(max_lines);
        lines[start..].to_vec()
    }
}
