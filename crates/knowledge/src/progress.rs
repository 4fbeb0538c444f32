//! Structured progress reporting for ingestion.
//!
//! Long-running phases (clone, discover, chunk, embed, index) emit events
//! through an optional callback; every event is also logged at debug level.

use std::sync::Arc;
use std::time::Instant;

/// Progress event emitted during ingestion.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// Phase of the operation: "clone", "discover", "chunk", "embed", "index"
    pub phase: String,

    /// Current progress (files processed, chunks embedded, etc.)
    pub current: u64,

    /// Total expected work (if known)
    pub total: Option<u64>,

    /// Percentage complete (0.0 - 100.0)
    pub percentage: Option<f64>,

    pub message: String,

    /// Seconds since the reporter was created
    pub elapsed_secs: Option<f64>,
}

impl ProgressEvent {
    pub fn new(
        phase: impl Into<String>,
        current: u64,
        total: Option<u64>,
        message: impl Into<String>,
    ) -> Self {
        let percentage = total.map(|t| {
            if t > 0 {
                (current as f64 / t as f64) * 100.0
            } else {
                100.0
            }
        });

        Self {
            phase: phase.into(),
            current,
            total,
            percentage,
            message: message.into(),
            elapsed_secs: None,
        }
    }

    pub fn with_elapsed(mut self, elapsed_secs: f64) -> Self {
        self.elapsed_secs = Some(elapsed_secs);
        self
    }

    /// Format as a simple user-facing line.
    pub fn format_simple(&self) -> String {
        let progress = match self.total {
            Some(total) => format!("{}/{}", self.current, total),
            None => self.current.to_string(),
        };

        let pct = self
            .percentage
            .map(|p| format!(" ({:.0}%)", p))
            .unwrap_or_default();

        format!("[{}] {}{} - {}", self.phase, progress, pct, self.message)
    }
}

/// Callback for progress events.
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Progress reporter that emits events through a callback.
#[derive(Clone)]
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    start_time: Arc<Instant>,
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::noop()
    }
}

impl ProgressReporter {
    pub fn new(callback: ProgressCallback) -> Self {
        Self {
            callback: Some(callback),
            start_time: Arc::new(Instant::now()),
        }
    }

    /// Create a reporter that only logs.
    pub fn noop() -> Self {
        Self {
            callback: None,
            start_time: Arc::new(Instant::now()),
        }
    }

    pub fn emit(&self, event: ProgressEvent) {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let event = event.with_elapsed(elapsed);

        tracing::debug!(
            phase = %event.phase,
            current = event.current,
            total = ?event.total,
            message = %event.message,
            elapsed_secs = elapsed,
            "Progress event"
        );

        if let Some(callback) = &self.callback {
            callback(event);
        }
    }

    pub fn clone_started(&self, identifier: &str) {
        self.emit(ProgressEvent::new(
            "clone",
            0,
            None,
            format!("fetching {}", identifier),
        ));
    }

    pub fn discover(&self, files: u64, root: &str) {
        self.emit(ProgressEvent::new(
            "discover",
            files,
            None,
            format!("{} files under {}", files, root),
        ));
    }

    pub fn chunk(&self, current: u64, total: Option<u64>, chunks_created: u64) {
        self.emit(ProgressEvent::new(
            "chunk",
            current,
            total,
            format!("{} chunks created", chunks_created),
        ));
    }

    pub fn embed(&self, current: u64, model: &str) {
        self.emit(ProgressEvent::new(
            "embed",
            current,
            None,
            format!("model={}", model),
        ));
    }

    pub fn index(&self, current: u64, total: Option<u64>, backend: &str) {
        self.emit(ProgressEvent::new(
            "index",
            current,
            total,
            format!("writing to {}", backend),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_progress_event_format() {
        let event = ProgressEvent::new("chunk", 5, Some(10), "12 chunks created");
        let formatted = event.format_simple();
        assert!(formatted.contains("[chunk]"));
        assert!(formatted.contains("5/10"));
        assert!(formatted.contains("50%"));
    }

    #[test]
    fn test_empty_total_is_complete() {
        let event = ProgressEvent::new("chunk", 0, Some(0), "nothing to do");
        assert_eq!(event.percentage, Some(100.0));
    }

    #[test]
    fn test_progress_reporter_emit() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();

        let reporter = ProgressReporter::new(Arc::new(move |event| {
            events_clone.lock().unwrap().push(event);
        }));

        reporter.discover(3, "/tmp/repo");
        reporter.index(2, Some(4), "sqlite");

        let captured = events.lock().unwrap();
        assert_eq!(captured.len(), 2);
        assert_eq!(captured[0].phase, "discover");
        assert_eq!(captured[0].current, 3);
        assert_eq!(captured[1].message, "writing to sqlite");
        assert!(captured[1].elapsed_secs.is_some());
    }

    #[test]
    fn test_noop_reporter() {
        let reporter = ProgressReporter::noop();
        reporter.clone_started("https://example.com/repo.git");
    }
}
