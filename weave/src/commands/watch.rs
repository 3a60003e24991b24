//! Watch mode command.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::debug;
use weave_core::{BuildSummary, DependencyGraph, FileWatcher, WatchEvent, WatchOptions};

use crate::formatting::{print_error, print_key_value, print_section_header, print_success, print_warning, SectionStyle};

use super::execution::{drive, print_build_results, print_event};
use super::{runtime, Workspace};

/// A change is worth a round when the node itself or one of its
/// dependents was selected.
fn is_relevant(graph: &DependencyGraph, name: &str) -> bool {
    let Some(node) = graph.get(name) else {
        return false;
    };
    node.is_enabled()
        || graph
            .dependents(name)
            .map(|dependents| dependents.iter().any(|d| d.is_enabled()))
            .unwrap_or(false)
}

fn report_round(summary: &BuildSummary) {
    if summary.is_success() {
        print_success(&format!("Round complete ({} nodes)", summary.reports().len()));
    } else {
        for name in summary.failed_names() {
            print_error(&format!("{} failed", name));
        }
        for name in summary.blocked_names() {
            print_warning(&format!("{} blocked", name));
        }
    }
    println!();
}

pub fn cmd_watch(root: PathBuf, nodes: Vec<String>, debounce_ms: Option<u64>) -> Result<()> {
    let (stop_tx, mut stop_rx) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .map_err(|e| anyhow::anyhow!("Failed to set signal handler: {}", e))?;

    let workspace = Workspace::load(&root)?;
    workspace.select(&nodes)?;
    let debounce = debounce_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| workspace.config.watch_debounce());

    print_section_header("Watch mode", SectionStyle::Primary);
    print_key_value("Watching", &workspace.root.display().to_string());
    if !nodes.is_empty() {
        print_key_value("Nodes", &nodes.join(", "));
    }
    println!("  Press Ctrl+C to stop");
    println!();

    let graph = &workspace.graph;
    let scheduler = workspace.scheduler(None);
    let total = graph.closure(&graph.enabled_nodes(), false).len();

    runtime()?.block_on(async {
        let initial = drive(scheduler.build_all(false, false), total, "Checking").await?;
        print_build_results(&initial, "Initial type-check", "All {} nodes type-checked");
        println!();

        let mut watcher = FileWatcher::new(&workspace.root, graph, &workspace.cache_dir())?;
        let mut session = scheduler.watch(WatchOptions { debounce, force: false });

        loop {
            tokio::select! {
                _ = stop_rx.recv() => {
                    println!();
                    print_warning("Stopping watch mode...");
                    break;
                }
                changes = watcher.next_changes() => {
                    for name in changes? {
                        if is_relevant(graph, &name) {
                            debug!(node = %name, "source change");
                            session.file_changed(&name)?;
                        }
                    }
                }
                event = session.next_event() => match event {
                    Some(WatchEvent::Recompilation(event)) => print_event(&event),
                    Some(WatchEvent::RoundComplete(summary)) => report_round(&summary),
                    None => break,
                },
            }
        }

        session.stop().await;
        Ok::<(), anyhow::Error>(())
    })
}
