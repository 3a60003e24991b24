//! Long-lived watch sessions that rebuild changed nodes and their dependents.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::compiler::Phase;
use crate::error::{Error, Result};
use crate::events::RecompilationEvent;
use crate::graph::DependencyGraph;
use crate::node::CompileContext;
use crate::scheduler::{execute, Force, Scheduler};
use crate::summary::BuildSummary;

#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Quiet period after the last trigger before a round starts.
    pub debounce: Duration,
    /// Bypass the fingerprint cache for dependents too. Changed nodes
    /// always re-run.
    pub force: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            force: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum WatchEvent {
    Recompilation(RecompilationEvent),
    /// A round settled. Failures are reported here and watching continues.
    RoundComplete(BuildSummary),
}

/// Feeds change notifications into a [`WatchSession`] from anywhere.
#[derive(Clone)]
pub struct FileChangeTrigger {
    graph: Arc<DependencyGraph>,
    tx: mpsc::UnboundedSender<String>,
}

impl FileChangeTrigger {
    /// Queues a rebuild of `node` and everything that depends on it.
    ///
    /// # Errors
    ///
    /// Fails for an unknown node or once the session has stopped.
    pub fn file_changed(&self, node: &str) -> Result<()> {
        let name = self.graph.node(node)?.name().to_string();
        self.tx
            .send(name)
            .map_err(|_| Error::Watcher("watch session has stopped".to_string()))
    }
}

/// A running watch session. Dropping it stops watching and kills any
/// compiler still running for it.
pub struct WatchSession {
    trigger: FileChangeTrigger,
    events: mpsc::UnboundedReceiver<WatchEvent>,
    task: Option<JoinHandle<()>>,
}

impl WatchSession {
    pub fn file_changed(&self, node: &str) -> Result<()> {
        self.trigger.file_changed(node)
    }

    pub fn trigger(&self) -> FileChangeTrigger {
        self.trigger.clone()
    }

    /// Waits for the next event. Only returns `None` after the session
    /// task has gone away.
    pub async fn next_event(&mut self) -> Option<WatchEvent> {
        self.events.recv().await
    }

    /// Stops the session and waits until its task has been torn down.
    pub async fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Scheduler {
    /// Starts a watch session. Must be called inside a Tokio runtime.
    pub fn watch(&self, options: WatchOptions) -> WatchSession {
        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run_session(
            Arc::clone(self.graph()),
            Arc::clone(self.context()),
            self.limit(),
            options,
            trigger_rx,
            event_tx,
        ));

        WatchSession {
            trigger: FileChangeTrigger {
                graph: Arc::clone(self.graph()),
                tx: trigger_tx,
            },
            events: event_rx,
            task: Some(task),
        }
    }
}

async fn run_session(
    graph: Arc<DependencyGraph>,
    ctx: Arc<CompileContext>,
    limit: Option<Arc<Semaphore>>,
    options: WatchOptions,
    mut triggers: mpsc::UnboundedReceiver<String>,
    out: mpsc::UnboundedSender<WatchEvent>,
) {
    let mut pending: BTreeSet<String> = BTreeSet::new();

    loop {
        // Triggers that arrived during the previous round are already queued.
        while let Ok(name) = triggers.try_recv() {
            pending.insert(name);
        }
        if pending.is_empty() {
            match triggers.recv().await {
                Some(name) => {
                    pending.insert(name);
                }
                None => return,
            }
        }
        while let Ok(Some(name)) = tokio::time::timeout(options.debounce, triggers.recv()).await {
            pending.insert(name);
        }

        let changed = std::mem::take(&mut pending);
        let dependents = graph.dependents_of(changed.iter().map(String::as_str));
        let targets: Vec<_> = graph
            .nodes()
            .filter(|n| {
                changed.contains(n.name()) || (n.is_enabled() && dependents.contains(n.name()))
            })
            .cloned()
            .collect();

        for name in &changed {
            if let Some(node) = graph.get(name) {
                node.invalidate();
            }
        }

        info!(
            changed = ?changed,
            targets = targets.len(),
            "change detected, rebuilding"
        );

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        // A change may lie outside a node's source set, so the changed
        // nodes always re-run; dependents still consult their fingerprints.
        let force = if options.force {
            Force::All
        } else {
            Force::Nodes(Arc::new(changed.iter().cloned().collect()))
        };
        let build = execute(
            targets,
            Phase::TypeCheck,
            force,
            Arc::clone(&ctx),
            events_tx,
            limit.clone(),
        );
        let forward = async {
            while let Some(event) = events_rx.recv().await {
                let _ = out.send(WatchEvent::Recompilation(event));
            }
        };
        let (summary, ()) = tokio::join!(build, forward);

        debug!(success = summary.is_success(), "watch round settled");
        if out.send(WatchEvent::RoundComplete(summary)).is_err() {
            return;
        }
    }
}
