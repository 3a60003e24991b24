//! Discovery and inspection commands.

use std::path::PathBuf;

use anyhow::Result;
use owo_colors::OwoColorize;

use crate::formatting::{print_node_table, print_section_header, print_warning, SectionStyle};

use super::Workspace;

pub fn cmd_list(root: PathBuf, json: bool) -> Result<()> {
    let workspace = Workspace::load(&root)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&workspace.members)?);
        return Ok(());
    }

    print_section_header("Workspace nodes", SectionStyle::Primary);
    if workspace.graph.is_empty() {
        print_warning("No weave.toml manifests found");
        println!();
        return Ok(());
    }

    let rows: Vec<_> = workspace
        .graph
        .nodes()
        .map(|node| {
            let location = node
                .location()
                .strip_prefix(&workspace.root)
                .unwrap_or(node.location())
                .display()
                .to_string();
            (
                node.name().to_string(),
                node.kind().as_str().to_string(),
                node.version().unwrap_or("-").to_string(),
                location,
            )
        })
        .collect();
    print_node_table(&rows);
    println!();

    Ok(())
}

pub fn cmd_graph(root: PathBuf, json: bool) -> Result<()> {
    let workspace = Workspace::load(&root)?;
    let graph = &workspace.graph;

    if json {
        let edges: serde_json::Map<String, serde_json::Value> = graph
            .nodes()
            .map(|node| {
                let deps: Vec<&str> = node.dependencies().iter().map(|d| d.name()).collect();
                (node.name().to_string(), serde_json::json!(deps))
            })
            .collect();
        let data = serde_json::json!({
            "order": graph.topological_order(),
            "levels": graph.dependency_levels(),
            "edges": edges,
        });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    print_section_header("Dependency graph", SectionStyle::Primary);
    if graph.is_empty() {
        print_warning("No weave.toml manifests found");
        println!();
        return Ok(());
    }

    println!(
        "  {} Topological order ({} nodes):",
        "OK".green(),
        graph.len().to_string().bold().cyan()
    );
    println!();
    for (idx, name) in graph.topological_order().iter().enumerate() {
        println!("  {} {}", format!("{:2}", idx + 1).bright_black(), name.bold().white());
    }
    println!();

    println!("  {} Levels:", "OK".green());
    println!();
    for (level, names) in graph.dependency_levels().iter().enumerate() {
        println!("  {} {}", format!("L{}", level).bright_black(), names.join(", "));
    }
    println!();

    Ok(())
}
