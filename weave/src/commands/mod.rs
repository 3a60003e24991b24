//! Command implementations for the CLI.

mod discovery;
mod execution;
mod info;
mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use weave_core::{
    ChecksumStore, DependencyGraph, Scanner, Scheduler, ShellCompiler, TracingObserver,
    WorkspaceConfig, WorkspaceMember, WorkspaceProvider,
};

pub use discovery::{cmd_graph, cmd_list};
pub use execution::{cmd_check, cmd_transpile};
pub use info::{cmd_clean, cmd_why};
pub use watch::cmd_watch;

/// A scanned workspace: its root, configuration and dependency graph.
struct Workspace {
    root: PathBuf,
    config: WorkspaceConfig,
    members: Vec<WorkspaceMember>,
    graph: Arc<DependencyGraph>,
}

impl Workspace {
    fn load(root: &Path) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("workspace root {} not found", root.display()))?;
        let scanner = Scanner::new(&root)?;
        let members = scanner.members()?;
        let graph = DependencyGraph::new(members.clone())?;
        graph.set_observer(Some(Arc::new(TracingObserver)));

        Ok(Self {
            config: scanner.config().clone(),
            members,
            graph: Arc::new(graph),
            root,
        })
    }

    fn cache_dir(&self) -> PathBuf {
        self.config.resolved_cache_dir(&self.root)
    }

    fn store(&self) -> ChecksumStore {
        ChecksumStore::new(&self.root, self.cache_dir())
    }

    fn scheduler(&self, parallel: Option<usize>) -> Scheduler {
        let compiler = ShellCompiler::new().with_typecheck_timeout(self.config.typecheck_timeout());
        Scheduler::new(Arc::clone(&self.graph), self.store(), Arc::new(compiler)).with_max_parallel(parallel)
    }

    /// Enables the named nodes, or every node when none are named.
    fn select(&self, nodes: &[String]) -> Result<()> {
        if nodes.is_empty() {
            self.graph.enable_all();
        } else {
            self.graph.enable(nodes)?;
        }
        Ok(())
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("failed to create tokio runtime")
}
