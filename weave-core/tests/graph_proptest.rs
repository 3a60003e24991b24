mod common;

use std::collections::HashMap;

use common::gen_dag_shape;
use proptest::prelude::*;
use weave_core::{DependencyGraph, NodeKind, WorkspaceMember};

fn gen_dag() -> impl Strategy<Value = Vec<WorkspaceMember>> {
    gen_dag_shape().prop_map(|shape| {
        shape
            .into_iter()
            .map(|(name, deps)| WorkspaceMember::new(name.clone(), NodeKind::Package, name).with_deps(deps))
            .collect()
    })
}

proptest! {
    #[test]
    fn test_order_puts_dependencies_first(members in gen_dag()) {
        let graph = DependencyGraph::new(members.clone()).unwrap();
        let order = graph.topological_order();
        prop_assert_eq!(order.len(), members.len());

        let position: HashMap<&str, usize> =
            order.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();
        for member in &members {
            for dep in &member.deps {
                prop_assert!(position[dep.as_str()] < position[member.name.as_str()]);
            }
        }
    }

    #[test]
    fn test_levels_partition_the_graph(members in gen_dag()) {
        let graph = DependencyGraph::new(members.clone()).unwrap();
        let mut level_of = HashMap::new();
        for (level, names) in graph.dependency_levels().iter().enumerate() {
            for name in names {
                prop_assert!(level_of.insert(name.clone(), level).is_none());
            }
        }
        prop_assert_eq!(level_of.len(), members.len());
        for member in &members {
            for dep in &member.deps {
                prop_assert!(level_of[dep] < level_of[&member.name]);
            }
        }
    }

    #[test]
    fn test_dependents_mirror_dependencies(members in gen_dag()) {
        let graph = DependencyGraph::new(members).unwrap();
        for node in graph.nodes() {
            for dep in graph.dependencies(node.name()).unwrap() {
                let dependents = graph.dependents(dep.name()).unwrap();
                prop_assert!(dependents.iter().any(|d| d.name() == node.name()));
            }
        }
    }

    #[test]
    fn test_back_edge_creates_cycle(members in gen_dag()) {
        prop_assume!(members.len() > 1);
        let last = members.len() - 1;
        let mut members = members;
        let target = members[last].name.clone();
        let acyclic = DependencyGraph::new(members.clone()).unwrap();
        let has_path_back = acyclic.get(&target).unwrap().depends_on("n0");

        members[0] = members[0].clone().with_deps(vec![target]);
        let result = DependencyGraph::new(members);
        prop_assert_eq!(result.is_err(), has_path_back);
    }
}
