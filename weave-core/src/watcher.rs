//! File watching and path to node resolution for watch mode.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::workspace::IGNORED_DIRS;

/// Watches a workspace root and reports which nodes own changed files.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    receiver: mpsc::UnboundedReceiver<notify::Result<Event>>,
    // Sorted by descending path length so nested nodes win.
    locations: Vec<(PathBuf, String)>,
    cache_dir: PathBuf,
}

impl FileWatcher {
    /// Starts watching `root` recursively.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Watcher`] if the platform watcher cannot be created
    /// or the root cannot be watched.
    pub fn new(root: &Path, graph: &DependencyGraph, cache_dir: &Path) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            NotifyConfig::default(),
        )
        .map_err(|e| Error::Watcher(format!("failed to create watcher: {}", e)))?;

        let root = canonical(root);
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| Error::Watcher(format!("failed to watch {}: {}", root.display(), e)))?;

        let mut locations: Vec<(PathBuf, String)> = graph
            .nodes()
            .map(|n| (canonical(n.location()), n.name().to_string()))
            .collect();
        locations.sort_by(|a, b| {
            b.0.components()
                .count()
                .cmp(&a.0.components().count())
                .then_with(|| a.1.cmp(&b.1))
        });

        debug!(root = %root.display(), nodes = locations.len(), "watching workspace");

        Ok(Self {
            _watcher: watcher,
            receiver: rx,
            locations,
            cache_dir: canonical(cache_dir),
        })
    }

    /// The node whose directory most specifically contains `path`.
    pub fn node_for_path(&self, path: &Path) -> Option<&str> {
        if path.starts_with(&self.cache_dir) {
            return None;
        }
        let (location, name) = self
            .locations
            .iter()
            .find(|(location, _)| path.starts_with(location))?;
        match path.strip_prefix(location) {
            Ok(relative) if in_ignored_dir(relative) => None,
            _ => Some(name.as_str()),
        }
    }

    /// Nodes touched by one filesystem event.
    pub fn affected_nodes(&self, event: &Event) -> BTreeSet<String> {
        if matches!(event.kind, EventKind::Access(_)) {
            return BTreeSet::new();
        }
        event
            .paths
            .iter()
            .filter_map(|p| self.node_for_path(p))
            .map(str::to_string)
            .collect()
    }

    /// Waits until an event touches at least one node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Watcher`] once the underlying watcher has shut down.
    pub async fn next_changes(&mut self) -> Result<BTreeSet<String>> {
        loop {
            match self.receiver.recv().await {
                Some(Ok(event)) => {
                    let nodes = self.affected_nodes(&event);
                    if !nodes.is_empty() {
                        return Ok(nodes);
                    }
                }
                Some(Err(e)) => warn!("watcher error: {}", e),
                None => return Err(Error::Watcher("watcher channel disconnected".to_string())),
            }
        }
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn in_ignored_dir(path: &Path) -> bool {
    path.components().any(|c| match c {
        std::path::Component::Normal(name) => name
            .to_str()
            .map(|name| IGNORED_DIRS.contains(&name))
            .unwrap_or(false),
        _ => false,
    })
}
