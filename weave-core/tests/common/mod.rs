#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;
use tempfile::TempDir;
use weave_core::{
    ChecksumStore, CompileContext, Compiler, DependencyGraph, Node, NodeKind, OutputLine, Phase,
    RecompilationEvent, Result, Scheduler, WorkspaceMember,
};

/// In-process compiler that records every run instead of spawning anything.
#[derive(Default)]
pub struct FakeCompiler {
    runs: Mutex<Vec<(String, Phase)>>,
    failing: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeCompiler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, node: &str) {
        self.failing.lock().unwrap().insert(node.to_string());
    }

    pub fn succeed(&self, node: &str) {
        self.failing.lock().unwrap().remove(node);
    }

    pub fn delay(&self, node: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(node.to_string(), delay);
    }

    pub fn delay_all(&self, nodes: &[&str], delay: Duration) {
        for node in nodes {
            self.delay(node, delay);
        }
    }

    pub fn runs(&self) -> Vec<(String, Phase)> {
        self.runs.lock().unwrap().clone()
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    pub fn runs_of(&self, node: &str, phase: Phase) -> usize {
        self.runs
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, p)| n == node && *p == phase)
            .count()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Compiler for FakeCompiler {
    async fn run(
        &self,
        node: &Node,
        phase: Phase,
        on_line: &mut (dyn FnMut(OutputLine) + Send),
    ) -> Result<bool> {
        self.runs
            .lock()
            .unwrap()
            .push((node.name().to_string(), phase));
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        on_line(OutputLine {
            text: format!("{} {}", phase, node.name()),
            is_stderr: false,
        });

        let delay = self.delays.lock().unwrap().get(node.name()).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let fails = self.failing.lock().unwrap().contains(node.name());
        if fails {
            on_line(OutputLine {
                text: format!("error: {} is broken", node.name()),
                is_stderr: true,
            });
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(!fails)
    }
}

/// Temporary workspace with one directory (and one source file) per node.
pub struct Fixture {
    pub dir: TempDir,
    pub members: Vec<WorkspaceMember>,
}

impl Fixture {
    pub fn new(nodes: &[(&str, &[&str])]) -> Self {
        let dir = TempDir::new().unwrap();
        let members = nodes
            .iter()
            .map(|(name, deps)| {
                let location = dir.path().join(name);
                fs::create_dir_all(location.join("src")).unwrap();
                fs::write(
                    location.join("src/index.ts"),
                    format!("export const name = '{}';\n", name),
                )
                .unwrap();
                WorkspaceMember::new(*name, NodeKind::Package, location).with_deps(deps.iter().copied())
            })
            .collect();
        Self { dir, members }
    }

    /// `core <- lib <- svc`
    pub fn chain() -> Self {
        Self::new(&[("core", &[]), ("lib", &["core"]), ("svc", &["lib"])])
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, node: &str, file: &str, content: &str) {
        let path = self.root().join(node).join(file);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    pub fn graph(&self) -> Arc<DependencyGraph> {
        let graph = DependencyGraph::new(self.members.clone()).unwrap();
        graph.enable_all();
        Arc::new(graph)
    }

    pub fn store(&self) -> ChecksumStore {
        ChecksumStore::new(self.root(), self.root().join(".weave/checksums"))
    }

    pub fn context(&self, compiler: &Arc<FakeCompiler>) -> CompileContext {
        CompileContext::new(self.store(), compiler.clone())
    }

    pub fn scheduler(&self, compiler: &Arc<FakeCompiler>) -> Scheduler {
        Scheduler::new(self.graph(), self.store(), compiler.clone())
    }
}

pub fn position(events: &[RecompilationEvent], node: &str, terminal: bool) -> Option<usize> {
    events
        .iter()
        .position(|e| e.node() == node && e.kind().is_terminal() == terminal)
}

/// Random DAG shapes as `(name, deps)`: node `n{i}` may only depend on
/// nodes with a smaller index.
pub fn gen_dag_shape() -> impl Strategy<Value = Vec<(String, Vec<String>)>> {
    (1usize..12).prop_flat_map(|count| {
        prop::collection::vec(prop::collection::vec(any::<prop::sample::Index>(), 0..4), count).prop_map(
            |picks| {
                picks
                    .into_iter()
                    .enumerate()
                    .map(|(i, deps)| {
                        let mut deps: Vec<String> = if i == 0 {
                            Vec::new()
                        } else {
                            deps.iter().map(|d| format!("n{}", d.index(i))).collect()
                        };
                        deps.sort();
                        deps.dedup();
                        (format!("n{}", i), deps)
                    })
                    .collect()
            },
        )
    })
}
