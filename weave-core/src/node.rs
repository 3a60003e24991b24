//! Graph vertices and their compilation state machines.
//!
//! Each [`Node`] owns two independent state machines, one per [`Phase`].
//! Requests for a phase that is already running attach to the in-flight run
//! instead of starting another subprocess, so every requester observes the
//! same outcome.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::checksum::{self, ChecksumStore, FingerprintMap};
use crate::compiler::{Compiler, OutputLine, Phase};
use crate::config::{Commands, SourceSet};
use crate::events::{Driver, EventSender, EventStream, RecompilationEvent};
use crate::observer::{self, StateObserver};
use crate::summary::BuildSummary;
use crate::workspace::WorkspaceMember;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Shared library consumed by other nodes.
    #[default]
    Package,
    /// Deployable unit.
    Service,
}

impl NodeKind {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Package => "package",
            NodeKind::Service => "service",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TranspileState {
    #[default]
    NotTranspiled,
    Transpiling,
    Transpiled,
    ErrorTranspiling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TypeCheckState {
    #[default]
    NotChecked,
    Checking,
    Success,
    Error,
}

/// Result of one phase run, shared by every requester of that run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub phase: Phase,
    pub success: bool,
    /// Success taken from the fingerprint cache without spawning a compiler.
    pub skipped: bool,
    pub duration: Duration,
    pub logs: Vec<String>,
}

/// Read-only copy of a node's state, handed to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSnapshot {
    pub name: String,
    pub kind: NodeKind,
    pub enabled: bool,
    pub type_check: TypeCheckState,
    pub transpile: TranspileState,
    pub has_checksums: bool,
    pub log_lines: usize,
}

/// What a node needs to run its phases.
pub struct CompileContext {
    pub store: ChecksumStore,
    pub compiler: Arc<dyn Compiler>,
}

impl CompileContext {
    pub fn new(store: ChecksumStore, compiler: Arc<dyn Compiler>) -> Self {
        Self { store, compiler }
    }
}

type Flight = watch::Receiver<Option<Outcome>>;

#[derive(Default)]
struct NodeState {
    transpile: TranspileState,
    type_check: TypeCheckState,
    last_checksums: Option<FingerprintMap>,
    logs: Vec<String>,
    type_check_flight: Option<Flight>,
    transpile_flight: Option<Flight>,
}

impl NodeState {
    fn flight_mut(&mut self, phase: Phase) -> &mut Option<Flight> {
        match phase {
            Phase::TypeCheck => &mut self.type_check_flight,
            Phase::Transpile => &mut self.transpile_flight,
        }
    }

    fn begin(&mut self, phase: Phase) {
        match phase {
            Phase::TypeCheck => {
                self.type_check = TypeCheckState::Checking;
                self.logs.clear();
            }
            Phase::Transpile => self.transpile = TranspileState::Transpiling,
        }
    }

    fn settle(&mut self, phase: Phase, success: bool) {
        match (phase, success) {
            (Phase::TypeCheck, true) => self.type_check = TypeCheckState::Success,
            (Phase::TypeCheck, false) => self.type_check = TypeCheckState::Error,
            (Phase::Transpile, true) => self.transpile = TranspileState::Transpiled,
            (Phase::Transpile, false) => self.transpile = TranspileState::ErrorTranspiling,
        }
    }

    fn abandon(&mut self, phase: Phase) {
        match phase {
            Phase::TypeCheck if self.type_check == TypeCheckState::Checking => {
                self.type_check = TypeCheckState::NotChecked;
            }
            Phase::Transpile if self.transpile == TranspileState::Transpiling => {
                self.transpile = TranspileState::NotTranspiled;
            }
            _ => {}
        }
    }
}

enum Attach {
    Leader(watch::Sender<Option<Outcome>>),
    Follower(Flight),
}

/// One vertex of the dependency graph.
pub struct Node {
    name: String,
    kind: NodeKind,
    version: Option<String>,
    location: PathBuf,
    sources: SourceSet,
    commands: Commands,
    dependencies: Vec<Arc<Node>>,
    enabled: AtomicBool,
    state: Mutex<NodeState>,
    observer: RwLock<Option<Arc<dyn StateObserver>>>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("location", &self.location)
            .field(
                "dependencies",
                &self.dependencies.iter().map(|d| d.name()).collect::<Vec<_>>(),
            )
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl Node {
    pub(crate) fn new(member: &WorkspaceMember, dependencies: Vec<Arc<Node>>) -> Self {
        Self {
            name: member.name.clone(),
            kind: member.kind,
            version: member.version.clone(),
            location: member.path.clone(),
            sources: member.sources.clone(),
            commands: member.commands.clone(),
            dependencies,
            enabled: AtomicBool::new(false),
            state: Mutex::new(NodeState::default()),
            observer: RwLock::new(None),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    #[inline]
    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn sources(&self) -> &SourceSet {
        &self.sources
    }

    pub fn command(&self, phase: Phase) -> Option<&str> {
        match phase {
            Phase::TypeCheck => self.commands.typecheck.as_deref(),
            Phase::Transpile => self.commands.transpile.as_deref(),
        }
    }

    /// Direct dependencies, fixed at graph construction.
    pub fn dependencies(&self) -> &[Arc<Node>] {
        &self.dependencies
    }

    /// All dependencies reachable from this node, each listed once.
    pub fn transitive_dependencies(&self) -> Vec<Arc<Node>> {
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        let mut stack: Vec<&Arc<Node>> = self.dependencies.iter().rev().collect();

        while let Some(dep) = stack.pop() {
            if !seen.insert(dep.name()) {
                continue;
            }
            result.push(Arc::clone(dep));
            stack.extend(dep.dependencies.iter().rev());
        }

        result
    }

    /// True if `name` is a direct or transitive dependency.
    pub fn depends_on(&self, name: &str) -> bool {
        let mut seen = HashSet::new();
        let mut stack: Vec<&Arc<Node>> = self.dependencies.iter().collect();

        while let Some(dep) = stack.pop() {
            if dep.name() == name {
                return true;
            }
            if seen.insert(dep.name()) {
                stack.extend(dep.dependencies.iter());
            }
        }

        false
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        if self.enabled.swap(enabled, Ordering::AcqRel) != enabled {
            self.notify();
        }
    }

    pub(crate) fn set_observer(&self, observer: Option<Arc<dyn StateObserver>>) {
        match self.observer.write() {
            Ok(mut slot) => *slot = observer,
            Err(poisoned) => *poisoned.into_inner() = observer,
        }
    }

    pub fn type_check_state(&self) -> TypeCheckState {
        self.lock().type_check
    }

    pub fn transpile_state(&self) -> TranspileState {
        self.lock().transpile
    }

    /// Output captured by the latest type-check.
    pub fn logs(&self) -> Vec<String> {
        self.lock().logs.clone()
    }

    /// Fingerprints recorded by the last successful type-check.
    pub fn last_checksums(&self) -> Option<FingerprintMap> {
        self.lock().last_checksums.clone()
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        let state = self.lock();
        self.snapshot_of(&state)
    }

    fn snapshot_of(&self, state: &NodeState) -> NodeSnapshot {
        NodeSnapshot {
            name: self.name.clone(),
            kind: self.kind,
            enabled: self.is_enabled(),
            type_check: state.type_check,
            transpile: state.transpile,
            has_checksums: state.last_checksums.is_some(),
            log_lines: state.logs.len(),
        }
    }

    /// Marks a settled type-check as stale, e.g. after a source change.
    ///
    /// Only the reported state changes; the next non-forced type-check still
    /// consults the persisted fingerprints.
    pub fn invalidate(&self) {
        self.update(|state| {
            if state.type_check != TypeCheckState::Checking {
                state.type_check = TypeCheckState::NotChecked;
            }
        });
    }

    fn lock(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update<R>(&self, f: impl FnOnce(&mut NodeState) -> R) -> R {
        let (result, snapshot) = {
            let mut state = self.lock();
            let result = f(&mut state);
            (result, self.snapshot_of(&state))
        };
        self.notify_with(&snapshot);
        result
    }

    fn notify(&self) {
        let snapshot = self.snapshot();
        self.notify_with(&snapshot);
    }

    fn notify_with(&self, snapshot: &NodeSnapshot) {
        let observer = match self.observer.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if let Some(observer) = observer {
            observer::notify(observer.as_ref(), snapshot);
        }
    }

    fn push_log(&self, line: String) {
        self.lock().logs.push(line);
    }

    fn attach(&self, phase: Phase) -> Attach {
        let mut snapshot = None;
        let attach = {
            let mut state = self.lock();
            match state.flight_mut(phase) {
                // A closed sender means the leader was cancelled; take over.
                Some(flight) if flight.has_changed().is_ok() => Attach::Follower(flight.clone()),
                slot => {
                    let (tx, rx) = watch::channel(None);
                    *slot = Some(rx);
                    state.begin(phase);
                    snapshot = Some(self.snapshot_of(&state));
                    Attach::Leader(tx)
                }
            }
        };
        if let Some(snapshot) = snapshot {
            self.notify_with(&snapshot);
        }
        attach
    }

    /// Type-checks this node, emitting a start and a terminal event on `events`.
    ///
    /// Unless `force` is set, the node's transitive fingerprints are compared
    /// with the last persisted ones and an unchanged node succeeds without
    /// spawning a compiler. A request arriving while a type-check is running
    /// waits for that run instead of starting another.
    pub async fn type_check(
        self: &Arc<Self>,
        ctx: &CompileContext,
        force: bool,
        events: &EventSender,
    ) -> Outcome {
        self.run_phase(Phase::TypeCheck, ctx, force, events).await
    }

    /// Transpiles this node. Never cached.
    pub async fn transpile(self: &Arc<Self>, ctx: &CompileContext, events: &EventSender) -> Outcome {
        self.run_phase(Phase::Transpile, ctx, true, events).await
    }

    /// Lazily type-checks this node alone as an [`EventStream`].
    pub fn type_check_events(self: &Arc<Self>, ctx: Arc<CompileContext>, force: bool) -> EventStream {
        let node = Arc::clone(self);
        EventStream::new(move |events| {
            let driver: Driver = Box::pin(async move {
                let started = Instant::now();
                let outcome = node.type_check(&ctx, force, &events).await;
                let mut summary = BuildSummary::new();
                summary.record(node.name(), &outcome);
                summary.set_total_duration(started.elapsed());
                summary.into_result()
            });
            driver
        })
    }

    pub(crate) async fn run_phase(
        self: &Arc<Self>,
        phase: Phase,
        ctx: &CompileContext,
        force: bool,
        events: &EventSender,
    ) -> Outcome {
        let _ = events.send(RecompilationEvent::started(&self.name, phase));

        let outcome = loop {
            match self.attach(phase) {
                Attach::Follower(mut flight) => {
                    debug!(node = %self.name, %phase, "attaching to in-flight run");
                    let settled = match flight.wait_for(Option::is_some).await {
                        Ok(outcome) => outcome.clone(),
                        Err(_) => None,
                    };
                    if let Some(outcome) = settled {
                        break outcome;
                    }
                    debug!(node = %self.name, %phase, "in-flight run was cancelled, retrying");
                }
                Attach::Leader(tx) => {
                    let guard = FlightGuard {
                        node: self,
                        phase,
                        tx: Some(tx),
                    };
                    let outcome = match phase {
                        Phase::TypeCheck => self.perform_type_check(ctx, force).await,
                        Phase::Transpile => self.perform_transpile(ctx).await,
                    };
                    guard.complete(&outcome);
                    break outcome;
                }
            }
        };

        let _ = events.send(RecompilationEvent::finished(&self.name, &outcome));
        outcome
    }

    async fn perform_type_check(self: &Arc<Self>, ctx: &CompileContext, force: bool) -> Outcome {
        let started = Instant::now();
        let current = self.calculate_fingerprints(ctx).await;

        if !force {
            if let Some(current) = &current {
                let previous = ctx.store.read(&self.name);
                if !checksum::compare(previous.as_ref(), current) {
                    info!(node = %self.name, "sources unchanged, skipping type check");
                    self.push_log(format!(
                        "Type check skipped for {}: sources unchanged since last success",
                        self.name
                    ));
                    let logs = {
                        let mut state = self.lock();
                        state.last_checksums = Some(current.clone());
                        state.logs.clone()
                    };
                    return Outcome {
                        phase: Phase::TypeCheck,
                        success: true,
                        skipped: true,
                        duration: started.elapsed(),
                        logs,
                    };
                }
            }
        }

        let (success, _) = self.run_compiler(ctx, Phase::TypeCheck).await;

        if success {
            if let Some(current) = current {
                if let Err(e) = self.persist_fingerprints(ctx, &current).await {
                    warn!(node = %self.name, "failed to persist fingerprints: {}", e);
                }
                self.lock().last_checksums = Some(current);
            }
        }

        Outcome {
            phase: Phase::TypeCheck,
            success,
            skipped: false,
            duration: started.elapsed(),
            logs: self.logs(),
        }
    }

    async fn perform_transpile(self: &Arc<Self>, ctx: &CompileContext) -> Outcome {
        let started = Instant::now();
        let (success, logs) = self.run_compiler(ctx, Phase::Transpile).await;
        Outcome {
            phase: Phase::Transpile,
            success,
            skipped: false,
            duration: started.elapsed(),
            logs,
        }
    }

    async fn run_compiler(&self, ctx: &CompileContext, phase: Phase) -> (bool, Vec<String>) {
        let mut captured = Vec::new();
        let result = {
            let mut on_line = |line: OutputLine| {
                if phase == Phase::TypeCheck {
                    self.push_log(line.text.clone());
                }
                captured.push(line.text);
            };
            ctx.compiler.run(self, phase, &mut on_line).await
        };

        match result {
            Ok(success) => (success, captured),
            Err(e) => {
                warn!(node = %self.name, %phase, "{}", e);
                if phase == Phase::TypeCheck {
                    self.push_log(e.to_string());
                }
                captured.push(e.to_string());
                (false, captured)
            }
        }
    }

    async fn calculate_fingerprints(self: &Arc<Self>, ctx: &CompileContext) -> Option<FingerprintMap> {
        let node = Arc::clone(self);
        let store = ctx.store.clone();
        let calculated = tokio::task::spawn_blocking(move || store.calculate(&node)).await;

        match calculated {
            Ok(Ok(map)) => Some(map),
            Ok(Err(e)) => {
                warn!(node = %self.name, "cannot fingerprint sources, assuming changed: {}", e);
                None
            }
            Err(e) => {
                warn!(node = %self.name, "fingerprint task failed, assuming changed: {}", e);
                None
            }
        }
    }

    async fn persist_fingerprints(&self, ctx: &CompileContext, map: &FingerprintMap) -> crate::Result<()> {
        let store = ctx.store.clone();
        let name = self.name.clone();
        let map = map.clone();
        tokio::task::spawn_blocking(move || store.write(&name, &map))
            .await
            .map_err(|e| crate::Error::Checksum {
                node: self.name.clone(),
                message: e.to_string(),
            })?
    }
}

/// Owns the leader's side of a single-flight run. Dropping it before
/// [`complete`](Self::complete) (the run was cancelled) releases the slot
/// and rolls the state back. Waiting followers then retry and one of them
/// leads a fresh run.
struct FlightGuard<'a> {
    node: &'a Node,
    phase: Phase,
    tx: Option<watch::Sender<Option<Outcome>>>,
}

impl FlightGuard<'_> {
    fn complete(mut self, outcome: &Outcome) {
        let tx = self.tx.take();
        let phase = self.phase;
        self.node.update(|state| {
            state.settle(phase, outcome.success);
            *state.flight_mut(phase) = None;
        });
        if let Some(tx) = tx {
            let _ = tx.send(Some(outcome.clone()));
        }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let phase = self.phase;
            self.node.update(|state| {
                state.abandon(phase);
                *state.flight_mut(phase) = None;
            });
            // Followers wake only after the slot is free.
            drop(tx);
        }
    }
}
