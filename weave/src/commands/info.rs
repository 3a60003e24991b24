//! Node information and cache maintenance commands.

use std::path::PathBuf;

use anyhow::Result;

use crate::formatting::{
    print_key_value, print_node_list, print_section_header, print_separator_with_spacing, print_success,
    SectionStyle,
};

use super::Workspace;

fn names(nodes: &[std::sync::Arc<weave_core::Node>]) -> Vec<String> {
    nodes.iter().map(|n| n.name().to_string()).collect()
}

pub fn cmd_why(root: PathBuf, node: String) -> Result<()> {
    let workspace = Workspace::load(&root)?;
    let graph = &workspace.graph;

    let target = graph.node(&node)?;
    let deps = names(&graph.dependencies(&node)?);
    let parents = names(&graph.parents(&node)?);
    let dependents = names(&graph.dependents(&node)?);

    print_section_header("Node dependencies", SectionStyle::Primary);
    print_key_value("Node", target.name());
    print_key_value("Kind", target.kind().as_str());
    print_key_value("Location", &target.location().display().to_string());
    print_separator_with_spacing();

    print_key_value("Depends on", &format!("{} nodes", deps.len()));
    print_node_list(&deps);
    println!();

    print_key_value("Direct dependents", &format!("{} nodes", parents.len()));
    print_node_list(&parents);
    println!();

    print_key_value("Rechecked on change", &format!("{} nodes", dependents.len()));
    print_node_list(&dependents);
    println!();

    Ok(())
}

pub fn cmd_clean(root: PathBuf) -> Result<()> {
    let workspace = Workspace::load(&root)?;
    let store = workspace.store();

    store.clear_all()?;

    print_section_header("Clean", SectionStyle::Success);
    print_success(&format!("Removed {}", store.cache_dir().display()));
    println!();

    Ok(())
}
