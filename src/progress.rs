//! Corpus sync progress reporting.
//!
//! The synchronizer never writes logs itself; it emits [`SyncEvent`]s to the
//! [`SyncReporter`] it was built with. [`TracingReporter`] forwards them to
//! `tracing` (stderr). [`QuietReporter`] drops routine steps and is handed to
//! the remote while git and archive work is running.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Lifecycle of the local corpus.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Uninitialized,
    Acquiring,
    Ready,
    Refreshing,
    /// Every acquisition strategy failed; the root holds a placeholder.
    Degraded,
}

/// Result of one `sync` call.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Fresh working copy cloned.
    Cloned,
    /// Fresh snapshot archive extracted.
    Downloaded,
    /// Refresh pulled new commits.
    Updated,
    UpToDate,
    /// Snapshot mode found a populated root and left it alone.
    Existing,
    /// Refresh or re-acquisition failed; the previous corpus is still served.
    Failed,
    Placeholder,
    /// Another sync was already running.
    Skipped,
}

impl SyncOutcome {
    /// Whether files under the root were replaced.
    pub fn changed_corpus(self) -> bool {
        matches!(
            self,
            SyncOutcome::Cloned
                | SyncOutcome::Downloaded
                | SyncOutcome::Updated
                | SyncOutcome::Placeholder
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncEvent {
    Step(String),
    Warning(String),
    Failed(String),
    Finished { outcome: SyncOutcome, phase: SyncPhase },
}

impl SyncEvent {
    pub fn step(message: impl Into<String>) -> Self {
        SyncEvent::Step(message.into())
    }

    pub fn warning(message: impl Into<String>) -> Self {
        SyncEvent::Warning(message.into())
    }

    pub fn failed(message: impl Into<String>) -> Self {
        SyncEvent::Failed(message.into())
    }
}

pub trait SyncReporter: Send + Sync {
    fn report(&self, event: SyncEvent);
}

/// Writes events through `tracing`.
pub struct TracingReporter;

impl SyncReporter for TracingReporter {
    fn report(&self, event: SyncEvent) {
        match event {
            SyncEvent::Step(message) => info!(target: "docs_harness::sync", "{}", message),
            SyncEvent::Warning(message) => warn!(target: "docs_harness::sync", "{}", message),
            SyncEvent::Failed(message) => error!(target: "docs_harness::sync", "{}", message),
            SyncEvent::Finished { outcome, phase } => {
                info!(target: "docs_harness::sync", ?outcome, ?phase, "sync finished")
            }
        }
    }
}

/// Forwards only warnings and failures.
pub struct QuietReporter {
    inner: Arc<dyn SyncReporter>,
}

impl QuietReporter {
    pub fn new(inner: Arc<dyn SyncReporter>) -> Self {
        Self { inner }
    }
}

impl SyncReporter for QuietReporter {
    fn report(&self, event: SyncEvent) {
        if matches!(event, SyncEvent::Warning(_) | SyncEvent::Failed(_)) {
            self.inner.report(event);
        }
    }
}

/// No-op reporter.
pub struct NoProgress;

impl SyncReporter for NoProgress {
    fn report(&self, _event: SyncEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<SyncEvent>>);

    impl SyncReporter for Recorder {
        fn report(&self, event: SyncEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn quiet_reporter_drops_steps() {
        let recorder = Arc::new(Recorder::default());
        let quiet = QuietReporter::new(recorder.clone());
        quiet.report(SyncEvent::step("git fetch"));
        quiet.report(SyncEvent::warning("fetch slow"));
        quiet.report(SyncEvent::failed("pull failed"));
        quiet.report(SyncEvent::Finished {
            outcome: SyncOutcome::UpToDate,
            phase: SyncPhase::Ready,
        });
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![SyncEvent::warning("fetch slow"), SyncEvent::failed("pull failed")]
        );
    }

    #[test]
    fn changed_corpus() {
        assert!(SyncOutcome::Updated.changed_corpus());
        assert!(SyncOutcome::Placeholder.changed_corpus());
        assert!(!SyncOutcome::UpToDate.changed_corpus());
        assert!(!SyncOutcome::Skipped.changed_corpus());
    }

    #[test]
    fn serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SyncOutcome::UpToDate).unwrap(),
            "\"up_to_date\""
        );
        assert_eq!(serde_json::to_string(&SyncPhase::Degraded).unwrap(), "\"degraded\"");
    }
}
