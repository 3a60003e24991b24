//! Recompilation events and the lazy event stream every build returns.

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::compiler::Phase;
use crate::error::{Error, Result};
use crate::node::Outcome;
use crate::summary::BuildSummary;

pub type EventSender = mpsc::UnboundedSender<RecompilationEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    TypeCheckStarted,
    TypeCheckSuccess,
    TypeCheckFailure,
    TranspileStarted,
    TranspileSuccess,
    TranspileFailure,
}

impl EventKind {
    pub fn started(phase: Phase) -> Self {
        match phase {
            Phase::TypeCheck => EventKind::TypeCheckStarted,
            Phase::Transpile => EventKind::TranspileStarted,
        }
    }

    pub fn finished(phase: Phase, success: bool) -> Self {
        match (phase, success) {
            (Phase::TypeCheck, true) => EventKind::TypeCheckSuccess,
            (Phase::TypeCheck, false) => EventKind::TypeCheckFailure,
            (Phase::Transpile, true) => EventKind::TranspileSuccess,
            (Phase::Transpile, false) => EventKind::TranspileFailure,
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EventKind::TypeCheckStarted | EventKind::TranspileStarted)
    }

    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(self, EventKind::TypeCheckFailure | EventKind::TranspileFailure)
    }
}

/// One notification about a node, emitted on a build's event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecompilationEvent {
    kind: EventKind,
    node: String,
    duration_ms: Option<u64>,
    skipped: bool,
    logs: Option<Vec<String>>,
}

impl RecompilationEvent {
    pub(crate) fn started(node: &str, phase: Phase) -> Self {
        Self {
            kind: EventKind::started(phase),
            node: node.to_string(),
            duration_ms: None,
            skipped: false,
            logs: None,
        }
    }

    pub(crate) fn finished(node: &str, outcome: &Outcome) -> Self {
        Self {
            kind: EventKind::finished(outcome.phase, outcome.success),
            node: node.to_string(),
            duration_ms: Some(outcome.duration.as_millis() as u64),
            skipped: outcome.skipped,
            logs: Some(outcome.logs.clone()),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.duration_ms
    }

    /// True for a success that came from the fingerprint cache.
    pub fn skipped(&self) -> bool {
        self.skipped
    }

    pub fn logs(&self) -> Option<&[String]> {
        self.logs.as_deref()
    }
}

pub(crate) type Driver = Pin<Box<dyn Future<Output = Result<BuildSummary>> + Send + 'static>>;

enum DriverState {
    Idle(Driver),
    Running(JoinHandle<Result<BuildSummary>>),
    Done,
}

/// Events of one build, followed by its aggregate result.
///
/// Nothing runs until the stream is first polled through [`next`](Self::next),
/// [`finish`](Self::finish) or [`collect`](Self::collect). Dropping the stream
/// aborts the build and kills the subprocesses it is waiting on.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<RecompilationEvent>,
    state: DriverState,
}

impl EventStream {
    pub(crate) fn new<F>(build: F) -> Self
    where
        F: FnOnce(EventSender) -> Driver,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            rx,
            state: DriverState::Idle(build(tx)),
        }
    }

    fn start(&mut self) {
        if matches!(self.state, DriverState::Idle(_)) {
            if let DriverState::Idle(driver) = std::mem::replace(&mut self.state, DriverState::Done) {
                self.state = DriverState::Running(tokio::spawn(driver));
            }
        }
    }

    /// Returns the next event, or `None` once the build has settled.
    pub async fn next(&mut self) -> Option<RecompilationEvent> {
        self.start();
        self.rx.recv().await
    }

    /// Drains the remaining events and returns the aggregate result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BuildFailed`] when any node failed.
    pub async fn finish(mut self) -> Result<BuildSummary> {
        while self.next().await.is_some() {}
        self.settle().await
    }

    /// Like [`finish`](Self::finish) but keeps every event.
    pub async fn collect(mut self) -> (Vec<RecompilationEvent>, Result<BuildSummary>) {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        let result = self.settle().await;
        (events, result)
    }

    async fn settle(&mut self) -> Result<BuildSummary> {
        self.start();
        match std::mem::replace(&mut self.state, DriverState::Done) {
            DriverState::Running(handle) => handle
                .await
                .map_err(|e| Error::Scheduler(format!("build task failed: {}", e)))?,
            _ => Err(Error::Scheduler("event stream already consumed".to_string())),
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let DriverState::Running(handle) = &self.state {
            handle.abort();
        }
    }
}
