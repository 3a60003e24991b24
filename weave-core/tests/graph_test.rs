use std::sync::Arc;

use weave_core::{DependencyGraph, Error, NodeKind, WorkspaceMember};

fn member(name: &str, deps: &[&str]) -> WorkspaceMember {
    WorkspaceMember::new(name, NodeKind::Package, format!("nodes/{}", name)).with_deps(deps.iter().copied())
}

fn service(name: &str, deps: &[&str]) -> WorkspaceMember {
    WorkspaceMember::new(name, NodeKind::Service, format!("services/{}", name))
        .with_deps(deps.iter().copied())
}

fn create_test_members() -> Vec<WorkspaceMember> {
    vec![
        service("svc", &["lib"]),
        member("lib", &["core"]),
        member("core", &[]),
    ]
}

fn names(nodes: &[Arc<weave_core::Node>]) -> Vec<&str> {
    nodes.iter().map(|n| n.name()).collect()
}

#[test]
fn test_topological_order() {
    let graph = DependencyGraph::new(create_test_members()).unwrap();
    assert_eq!(graph.topological_order(), ["core", "lib", "svc"]);
    assert_eq!(graph.len(), 3);
}

#[test]
fn test_dependency_levels() {
    let graph = DependencyGraph::new(vec![
        member("core", &[]),
        member("utils", &[]),
        member("lib", &["core", "utils"]),
        service("api", &["lib"]),
        service("cron", &["core"]),
    ])
    .unwrap();

    let levels = graph.dependency_levels();
    assert_eq!(levels.len(), 3);
    assert!(levels[0].contains(&"core".to_string()));
    assert!(levels[0].contains(&"utils".to_string()));
    assert!(levels[1].contains(&"lib".to_string()));
    assert!(levels[1].contains(&"cron".to_string()));
    assert_eq!(levels[2], vec!["api".to_string()]);
}

#[test]
fn test_nodes_are_shared_between_dependents() {
    let graph = DependencyGraph::new(vec![
        member("core", &[]),
        member("a", &["core"]),
        member("b", &["core"]),
    ])
    .unwrap();

    let core = graph.get("core").unwrap();
    let via_a = &graph.get("a").unwrap().dependencies()[0];
    let via_b = &graph.get("b").unwrap().dependencies()[0];
    assert!(Arc::ptr_eq(core, via_a));
    assert!(Arc::ptr_eq(core, via_b));
}

#[test]
fn test_transitive_dependencies_and_dependents() {
    let graph = DependencyGraph::new(create_test_members()).unwrap();

    assert_eq!(names(&graph.dependencies("svc").unwrap()), vec!["core", "lib"]);
    assert!(graph.dependencies("core").unwrap().is_empty());
    assert_eq!(names(&graph.dependents("core").unwrap()), vec!["lib", "svc"]);
    assert!(graph.dependents("svc").unwrap().is_empty());
}

#[test]
fn test_parents_are_direct_only() {
    let graph = DependencyGraph::new(create_test_members()).unwrap();
    assert_eq!(names(&graph.parents("core").unwrap()), vec!["lib"]);
    assert_eq!(names(&graph.parents("lib").unwrap()), vec!["svc"]);
}

#[test]
fn test_kind_filters() {
    let graph = DependencyGraph::new(create_test_members()).unwrap();
    assert_eq!(names(&graph.packages()), vec!["core", "lib"]);
    assert_eq!(names(&graph.services()), vec!["svc"]);
}

#[test]
fn test_affected_nodes() {
    let graph = DependencyGraph::new(vec![
        member("core", &[]),
        member("lib", &["core"]),
        service("svc", &["lib"]),
        member("other", &[]),
    ])
    .unwrap();

    assert_eq!(graph.affected(&["core".to_string()]).unwrap(), ["core", "lib", "svc"]);
    assert_eq!(graph.affected(&["svc".to_string()]).unwrap(), ["svc"]);
    assert!(graph.affected(&["nope".to_string()]).is_err());
}

#[test]
fn test_nodes_start_disabled() {
    let graph = DependencyGraph::new(create_test_members()).unwrap();
    assert!(graph.enabled_nodes().is_empty());

    graph.enable_all();
    assert_eq!(graph.enabled_nodes().len(), 3);

    graph.disable_all();
    assert!(graph.enabled_nodes().is_empty());
}

#[test]
fn test_enable_subset() {
    let graph = DependencyGraph::new(create_test_members()).unwrap();
    graph.enable_all();
    graph.enable(&["lib"]).unwrap();
    assert_eq!(names(&graph.enabled_nodes()), vec!["lib"]);

    assert!(graph.enable(&["lib", "missing"]).is_err());
    assert_eq!(names(&graph.enabled_nodes()), vec!["lib"]);
}

#[test]
fn test_cycle_is_rejected_with_names() {
    let result = DependencyGraph::new(vec![member("a", &["b"]), member("b", &["a"])]);
    match result {
        Err(Error::CircularDependency(message)) => {
            assert!(message.contains('a'));
            assert!(message.contains('b'));
            assert!(message.contains("->"));
        }
        other => panic!("expected a cycle error, got {:?}", other.map(|g| g.len())),
    }
}

#[test]
fn test_longer_cycle_is_rejected() {
    let result = DependencyGraph::new(vec![
        member("entry", &["a"]),
        member("a", &["b"]),
        member("b", &["c"]),
        member("c", &["a"]),
    ]);
    match result {
        Err(Error::CircularDependency(message)) => {
            for name in ["a", "b", "c"] {
                assert!(message.contains(name), "{} missing from {}", name, message);
            }
            assert!(!message.contains("entry"));
        }
        other => panic!("expected a cycle error, got {:?}", other.map(|g| g.len())),
    }
}

#[test]
fn test_self_dependency_is_a_cycle() {
    let result = DependencyGraph::new(vec![member("solo", &["solo"])]);
    assert!(matches!(result, Err(Error::CircularDependency(m)) if m == "solo -> solo"));
}

#[test]
fn test_unknown_dependency() {
    let result = DependencyGraph::new(vec![member("lib", &["ghost"])]);
    assert!(matches!(result, Err(Error::NodeNotFound { name, .. }) if name == "ghost"));
}

#[test]
fn test_duplicate_names() {
    let result = DependencyGraph::new(vec![member("lib", &[]), service("lib", &[])]);
    assert!(matches!(result, Err(Error::DuplicateNode { name, .. }) if name == "lib"));
}

#[test]
fn test_invalid_name() {
    let result = DependencyGraph::new(vec![member("bad name", &[])]);
    assert!(matches!(result, Err(Error::InvalidNodeName(_))));
}

#[test]
fn test_scoped_names() {
    let graph = DependencyGraph::new(vec![
        member("@acme/core", &[]),
        member("@acme/web", &["@acme/core"]),
    ])
    .unwrap();
    assert!(graph.get("@acme/web").unwrap().depends_on("@acme/core"));
}

#[test]
fn test_empty_graph() {
    let graph = DependencyGraph::new(Vec::new()).unwrap();
    assert!(graph.is_empty());
    assert!(graph.topological_order().is_empty());
    assert!(graph.dependency_levels().is_empty());
}

#[test]
fn test_unknown_lookup_lists_available() {
    let graph = DependencyGraph::new(create_test_members()).unwrap();
    match graph.node("nope") {
        Err(Error::NodeNotFound { available, .. }) => assert!(available.contains("core")),
        other => panic!("unexpected: {:?}", other.map(|n| n.name().to_string())),
    }
}

/// Two nodes per layer, each depending on both nodes of the layer below.
fn layered_diamonds(layers: usize) -> Vec<WorkspaceMember> {
    (0..layers)
        .flat_map(|layer| {
            let below: Vec<String> = if layer == 0 {
                Vec::new()
            } else {
                vec![format!("n{}a", layer - 1), format!("n{}b", layer - 1)]
            };
            ["a", "b"].into_iter().map(move |side| {
                WorkspaceMember::new(format!("n{}{}", layer, side), NodeKind::Package, format!("nodes/n{}{}", layer, side))
                    .with_deps(below.clone())
            })
        })
        .collect()
}

#[test]
fn test_traversals_on_shared_diamonds_stay_linear() {
    let graph = DependencyGraph::new(layered_diamonds(40)).unwrap();
    let started = std::time::Instant::now();

    let dependents = graph.dependents("n0a").unwrap();
    assert_eq!(dependents.len(), 78);
    assert_eq!(dependents.last().map(|n| n.name()).map(|n| n.starts_with("n39")), Some(true));

    let affected = graph.affected(&["n0b".to_string()]).unwrap();
    assert_eq!(affected.len(), 79);

    let top = graph.get("n39a").unwrap();
    assert!(top.depends_on("n0a"));
    assert!(!top.depends_on("n39b"));
    assert_eq!(graph.dependencies("n39a").unwrap().len(), 78);

    assert!(started.elapsed() < std::time::Duration::from_secs(2));
}
