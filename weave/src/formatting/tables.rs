//! Tables built with comfy-table.

use comfy_table::{modifiers, presets, Attribute, Cell, Color, ContentArrangement, Table};
use owo_colors::OwoColorize;
use weave_core::{BuildSummary, NodeResult};

use super::output::format_duration;
use super::status::Status;

fn styled_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(*h).add_attribute(Attribute::Bold))
                .collect::<Vec<_>>(),
        )
        .load_preset(presets::UTF8_FULL)
        .apply_modifier(modifiers::UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Prints one row per node: name, kind, version and location.
pub fn print_node_table(nodes: &[(String, String, String, String)]) {
    let mut table = styled_table(&["Node", "Kind", "Version", "Location"]);
    for (name, kind, version, location) in nodes {
        table.add_row(vec![
            Cell::new(name).fg(Color::White),
            Cell::new(kind).fg(Color::Cyan),
            Cell::new(version).fg(Color::DarkGrey),
            Cell::new(location).fg(Color::DarkGrey),
        ]);
    }
    println!("{}", table);
}

pub fn print_node_list(nodes: &[String]) {
    if nodes.is_empty() {
        println!("  {} {}", "→".cyan(), "(none)".bright_black());
        return;
    }
    for node in nodes {
        println!("  {} {}", "→".cyan(), node.bold().white());
    }
}

/// Prints the per-node outcome of a build in completion order.
pub fn print_results_table(summary: &BuildSummary) {
    let mut table = styled_table(&["Status", "Node", "Result", "Duration", "Details"]);

    for report in summary.reports() {
        let (symbol, color, label, details) = match report.result {
            NodeResult::Succeeded => (Status::Success, Color::Green, "ok", String::new()),
            NodeResult::Cached => (Status::Success, Color::Green, "unchanged", String::new()),
            NodeResult::Failed => (
                Status::Error,
                Color::Red,
                "failed",
                report.logs.first().cloned().unwrap_or_default(),
            ),
            NodeResult::Blocked => (
                Status::Warning,
                Color::Yellow,
                "blocked",
                report
                    .blocked_by
                    .as_ref()
                    .map(|dep| format!("by {}", dep))
                    .unwrap_or_default(),
            ),
        };
        let duration = match report.result {
            NodeResult::Blocked => "-".to_string(),
            _ => format_duration(report.duration.as_secs_f64()),
        };
        table.add_row(vec![
            Cell::new(symbol.symbol()).fg(color),
            Cell::new(&report.name).fg(Color::White),
            Cell::new(label).fg(color),
            Cell::new(duration).fg(Color::DarkGrey),
            Cell::new(details).fg(color),
        ]);
    }

    println!("{}", table);
}
