//! Type-check and transpile commands.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use owo_colors::OwoColorize;
use weave_core::{BuildSummary, Error, EventKind, EventStream, RecompilationEvent};

use crate::formatting::{
    create_progress_bar, format_duration, print_results_table, print_section_header,
    print_separator_with_spacing, print_success, print_summary_box, print_warning, SectionStyle, Status,
};

use super::{runtime, Workspace};

/// Drains a build stream behind a progress bar and returns its summary,
/// whether the build succeeded or not.
pub(super) async fn drive(mut stream: EventStream, total: usize, verb: &str) -> Result<BuildSummary> {
    let pb = create_progress_bar(total as u64);
    pb.set_message(format!("{}...", verb));

    while let Some(event) = stream.next().await {
        if !event.kind().is_terminal() {
            pb.set_message(format!("{} {}", verb, event.node()));
            continue;
        }
        pb.inc(1);
        if event.kind().is_failure() {
            pb.suspend(|| {
                println!("  {}", Status::Error.format(&format!("{} failed", event.node())));
                let prefix = format!("[{}]", event.node());
                for line in event.logs().unwrap_or_default() {
                    println!("    {} {}", prefix.bright_black().bold(), line.bright_red());
                }
            });
        }
    }
    pb.finish_and_clear();

    match stream.finish().await {
        Ok(summary) => Ok(summary),
        Err(Error::BuildFailed(summary)) => Ok(*summary),
        Err(e) => Err(e.into()),
    }
}

/// Prints one event as a status line; used where no progress bar is shown.
pub(super) fn print_event(event: &RecompilationEvent) {
    let kind = event.kind();
    if !kind.is_terminal() {
        let verb = match kind {
            EventKind::TranspileStarted => "transpiling",
            _ => "checking",
        };
        println!("  {}", Status::Info.format(&format!("{} {}", verb, event.node())));
        return;
    }

    let elapsed = event
        .duration_ms()
        .map(|ms| format_duration(ms as f64 / 1000.0))
        .unwrap_or_default();
    if kind.is_failure() {
        println!("  {} {}", Status::Error.format(event.node()), elapsed.bright_black());
        for line in event.logs().unwrap_or_default() {
            println!("    {}", line.bright_red());
        }
    } else if event.skipped() {
        println!("  {} {}", Status::Success.format(event.node()), "(unchanged)".bright_black());
    } else {
        println!("  {} {}", Status::Success.format(event.node()), elapsed.bright_black());
    }
}

/// Prints the results table and a one-line verdict. Returns true on failure.
pub(super) fn print_build_results(summary: &BuildSummary, title: &str, success_msg: &str) -> bool {
    print_section_header(title, SectionStyle::Primary);
    print_results_table(summary);
    println!();

    let failed = !summary.is_success();
    if failed {
        print_warning(&format!(
            "{} failed, {} blocked",
            summary.failed_names().len(),
            summary.blocked_names().len()
        ));
    } else {
        print_success(&success_msg.replace("{}", &summary.reports().len().to_string()));
    }
    failed
}

fn print_totals(summary: &BuildSummary, started: Instant) {
    print_separator_with_spacing();
    print_summary_box(
        "Summary",
        &[
            ("Duration", &format_duration(started.elapsed().as_secs_f64())),
            ("Succeeded", &summary.succeeded_names().len().to_string()),
            ("Unchanged", &summary.cached_names().len().to_string()),
            ("Failed", &summary.failed_names().len().to_string()),
            ("Blocked", &summary.blocked_names().len().to_string()),
            ("Success rate", &format!("{:.0}%", summary.success_rate() * 100.0)),
        ],
    );
    println!();
}

pub fn cmd_check(
    root: PathBuf,
    nodes: Vec<String>,
    only_self: bool,
    force: bool,
    parallel: Option<usize>,
) -> Result<()> {
    let started = Instant::now();
    let workspace = Workspace::load(&root)?;
    workspace.select(&nodes)?;

    let graph = &workspace.graph;
    let total = graph.closure(&graph.enabled_nodes(), only_self).len();
    let scheduler = workspace.scheduler(parallel);

    print_section_header("Type-checking nodes", SectionStyle::Primary);
    let summary = runtime()?.block_on(drive(scheduler.build_all(only_self, force), total, "Checking"))?;

    let failed = print_build_results(&summary, "Type-check results", "All {} nodes type-checked");
    print_totals(&summary, started);

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

pub fn cmd_transpile(root: PathBuf, nodes: Vec<String>, only_self: bool, parallel: Option<usize>) -> Result<()> {
    let started = Instant::now();
    let workspace = Workspace::load(&root)?;
    workspace.select(&nodes)?;

    let graph = &workspace.graph;
    let total = graph.closure(&graph.enabled_nodes(), only_self).len();
    let scheduler = workspace.scheduler(parallel);

    print_section_header("Transpiling nodes", SectionStyle::Primary);
    let summary = runtime()?.block_on(drive(scheduler.transpile_all(only_self), total, "Transpiling"))?;

    let failed = print_build_results(&summary, "Transpile results", "All {} nodes transpiled");
    print_totals(&summary, started);

    if failed {
        std::process::exit(1);
    }
    Ok(())
}
