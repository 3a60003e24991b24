//! Dependency-ordered, concurrent recompilation of graph nodes.
//!
//! A node starts as soon as every direct dependency inside the target set
//! has settled successfully. Independent subtrees run side by side. When a
//! node fails, its dependents inside the target set are never started; the
//! rest of the build carries on and the failure surfaces in the aggregate
//! [`BuildSummary`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::checksum::ChecksumStore;
use crate::compiler::{Compiler, Phase};
use crate::error::Result;
use crate::events::{Driver, EventSender, EventStream};
use crate::graph::DependencyGraph;
use crate::node::{CompileContext, Node, Outcome};
use crate::summary::BuildSummary;

/// Turns build requests over the graph into event streams.
pub struct Scheduler {
    graph: Arc<DependencyGraph>,
    ctx: Arc<CompileContext>,
    limit: Option<Arc<Semaphore>>,
}

impl Scheduler {
    pub fn new(graph: Arc<DependencyGraph>, store: ChecksumStore, compiler: Arc<dyn Compiler>) -> Self {
        Self {
            graph,
            ctx: Arc::new(CompileContext::new(store, compiler)),
            limit: None,
        }
    }

    /// Caps the number of phases running at once across every stream of
    /// this scheduler. `None` (the default) leaves concurrency unbounded.
    pub fn with_max_parallel(mut self, max_parallel: Option<usize>) -> Self {
        self.limit = max_parallel.map(|n| Arc::new(Semaphore::new(n.max(1))));
        self
    }

    #[inline]
    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    #[inline]
    pub fn context(&self) -> &Arc<CompileContext> {
        &self.ctx
    }

    pub(crate) fn limit(&self) -> Option<Arc<Semaphore>> {
        self.limit.clone()
    }

    /// Type-checks `name` and, unless `only_self`, everything it depends on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeNotFound`](crate::Error::NodeNotFound) for an
    /// unknown name. Compilation failures are reported through the stream.
    pub fn build_one(&self, name: &str, only_self: bool, force: bool) -> Result<EventStream> {
        let root = Arc::clone(self.graph.node(name)?);
        let targets = self.graph.closure(&[root], only_self);
        Ok(self.stream(targets, Phase::TypeCheck, force))
    }

    /// Type-checks every enabled node and, unless `only_self`, their
    /// dependencies.
    pub fn build_all(&self, only_self: bool, force: bool) -> EventStream {
        let targets = self.graph.closure(&self.graph.enabled_nodes(), only_self);
        self.stream(targets, Phase::TypeCheck, force)
    }

    /// Transpiles `name` and, unless `only_self`, everything it depends on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeNotFound`](crate::Error::NodeNotFound) for an
    /// unknown name.
    pub fn transpile_one(&self, name: &str, only_self: bool) -> Result<EventStream> {
        let root = Arc::clone(self.graph.node(name)?);
        let targets = self.graph.closure(&[root], only_self);
        Ok(self.stream(targets, Phase::Transpile, true))
    }

    pub fn transpile_all(&self, only_self: bool) -> EventStream {
        let targets = self.graph.closure(&self.graph.enabled_nodes(), only_self);
        self.stream(targets, Phase::Transpile, true)
    }

    fn stream(&self, targets: Vec<Arc<Node>>, phase: Phase, force: bool) -> EventStream {
        let ctx = Arc::clone(&self.ctx);
        let limit = self.limit.clone();
        EventStream::new(move |events| {
            let driver: Driver = Box::pin(async move {
                execute(targets, phase, force.into(), ctx, events, limit)
                    .await
                    .into_result()
            });
            driver
        })
    }
}

/// Which nodes of a build bypass the fingerprint cache.
#[derive(Debug, Clone)]
pub(crate) enum Force {
    None,
    All,
    Nodes(Arc<HashSet<String>>),
}

impl Force {
    fn applies_to(&self, name: &str) -> bool {
        match self {
            Force::None => false,
            Force::All => true,
            Force::Nodes(names) => names.contains(name),
        }
    }
}

impl From<bool> for Force {
    fn from(force: bool) -> Self {
        if force {
            Force::All
        } else {
            Force::None
        }
    }
}

/// Reports a node task's outcome, even when the task panics.
struct CompletionGuard {
    name: String,
    phase: Phase,
    tx: Option<mpsc::UnboundedSender<(String, Outcome)>>,
}

impl CompletionGuard {
    fn complete(mut self, outcome: Outcome) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send((std::mem::take(&mut self.name), outcome));
        }
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let outcome = Outcome {
                phase: self.phase,
                success: false,
                skipped: false,
                duration: Duration::ZERO,
                logs: vec![format!("{} task for {} panicked", self.phase, self.name)],
            };
            let _ = tx.send((std::mem::take(&mut self.name), outcome));
        }
    }
}

/// Runs `phase` over `targets` in dependency order and waits for every
/// started node to settle.
///
/// `targets` must be closed under the order that matters to the caller:
/// edges leaving the set are ignored.
pub(crate) async fn execute(
    targets: Vec<Arc<Node>>,
    phase: Phase,
    force: Force,
    ctx: Arc<CompileContext>,
    events: EventSender,
    limit: Option<Arc<Semaphore>>,
) -> BuildSummary {
    let started = Instant::now();
    let mut summary = BuildSummary::new();

    if targets.is_empty() {
        return summary;
    }
    info!(%phase, nodes = targets.len(), ?force, "starting build");

    let in_set: HashSet<&str> = targets.iter().map(|n| n.name()).collect();
    let mut waiting_on: HashMap<String, usize> = HashMap::with_capacity(targets.len());
    let mut dependents: HashMap<String, Vec<Arc<Node>>> = HashMap::new();

    for node in &targets {
        let deps_in_set: Vec<&Arc<Node>> = node
            .dependencies()
            .iter()
            .filter(|d| in_set.contains(d.name()))
            .collect();
        waiting_on.insert(node.name().to_string(), deps_in_set.len());
        for dep in deps_in_set {
            dependents
                .entry(dep.name().to_string())
                .or_default()
                .push(Arc::clone(node));
        }
    }

    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(String, Outcome)>();
    let mut tasks = JoinSet::new();
    let mut running = 0usize;
    let mut blocked: HashSet<String> = HashSet::new();

    let spawn = |tasks: &mut JoinSet<()>, node: Arc<Node>| {
        let ctx = Arc::clone(&ctx);
        let events = events.clone();
        let limit = limit.clone();
        let force = force.applies_to(node.name());
        let guard = CompletionGuard {
            name: node.name().to_string(),
            phase,
            tx: Some(done_tx.clone()),
        };
        tasks.spawn(async move {
            let _permit = match limit {
                Some(semaphore) => semaphore.acquire_owned().await.ok(),
                None => None,
            };
            let outcome = node.run_phase(phase, &ctx, force, &events).await;
            guard.complete(outcome);
        });
    };

    for node in &targets {
        if waiting_on.get(node.name()) == Some(&0) {
            spawn(&mut tasks, Arc::clone(node));
            running += 1;
        }
    }

    while running > 0 {
        let Some((name, outcome)) = done_rx.recv().await else {
            break;
        };
        running -= 1;
        summary.record(&name, &outcome);

        let direct = dependents.get(&name).cloned().unwrap_or_default();
        if outcome.success {
            for dependent in direct {
                if blocked.contains(dependent.name()) {
                    continue;
                }
                if let Some(count) = waiting_on.get_mut(dependent.name()) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        debug!(node = dependent.name(), "dependencies settled");
                        spawn(&mut tasks, dependent);
                        running += 1;
                    }
                }
            }
        } else {
            let mut queue: VecDeque<Arc<Node>> = direct.into();
            while let Some(dependent) = queue.pop_front() {
                if !blocked.insert(dependent.name().to_string()) {
                    continue;
                }
                warn!(node = dependent.name(), failed = %name, %phase, "skipping, dependency failed");
                summary.record_blocked(dependent.name(), &name);
                if let Some(next) = dependents.get(dependent.name()) {
                    queue.extend(next.iter().cloned());
                }
            }
        }
    }

    while tasks.join_next().await.is_some() {}

    summary.set_total_duration(started.elapsed());
    info!(
        %phase,
        failed = summary.failed_names().len(),
        blocked = summary.blocked_names().len(),
        elapsed = ?summary.total_duration(),
        "build finished"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_reports_when_dropped_without_completing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let guard = CompletionGuard {
            name: "core".to_string(),
            phase: Phase::TypeCheck,
            tx: Some(tx),
        };
        drop(guard);
        let (name, outcome) = rx.try_recv().unwrap();
        assert_eq!(name, "core");
        assert!(!outcome.success);
    }

    #[test]
    fn guard_reports_once_on_completion() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let guard = CompletionGuard {
            name: "core".to_string(),
            phase: Phase::Transpile,
            tx: Some(tx),
        };
        guard.complete(Outcome {
            phase: Phase::Transpile,
            success: true,
            skipped: false,
            duration: Duration::from_millis(3),
            logs: Vec::new(),
        });
        let (_, outcome) = rx.try_recv().unwrap();
        assert!(outcome.success);
        assert!(rx.try_recv().is_err());
    }
}
