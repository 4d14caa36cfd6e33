//! Dependency resolution
//!
//! Turns a [`ResourceGraph`] into a deterministic [`ExecutionPlan`] with
//! Kahn's algorithm. Among nodes that are ready at the same time the one
//! declared first wins, so a given graph always yields the same order.

use crate::error::CycleError;
use crate::graph::{ResourceGraph, ResourceNode};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Topologically sorted nodes of a graph. Regenerated on every run.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    steps: Vec<ResourceNode>,
    depth: HashMap<String, usize>,
}

impl ExecutionPlan {
    pub fn steps(&self) -> &[ResourceNode] {
        &self.steps
    }

    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|n| n.name.as_str()).collect()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|n| n.name == name)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Groups of nodes whose dependencies all sit in earlier groups.
    ///
    /// Nodes within one layer can be realized concurrently.
    pub fn layers(&self) -> Vec<Vec<&str>> {
        let mut layers: Vec<Vec<&str>> = Vec::new();
        for node in &self.steps {
            let depth = self.depth[&node.name];
            if layers.len() <= depth {
                layers.resize_with(depth + 1, Vec::new);
            }
            layers[depth].push(&node.name);
        }
        layers
    }
}

/// Orders the graph so every node comes after all of its dependencies
pub fn resolve(graph: &ResourceGraph) -> Result<ExecutionPlan, CycleError> {
    let nodes = graph.nodes();
    let mut in_degree = vec![0usize; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

    for (i, node) in nodes.iter().enumerate() {
        for dep in node.dependencies() {
            // Unknown names are reported by validate; they cannot block here
            if let Some(j) = graph.position(&dep) {
                in_degree[i] += 1;
                dependents[j].push(i);
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    let mut depth: HashMap<String, usize> = HashMap::new();

    while let Some(Reverse(i)) = ready.pop() {
        let node = &nodes[i];
        let level = node
            .dependencies()
            .iter()
            .filter_map(|d| depth.get(d))
            .map(|d| d + 1)
            .max()
            .unwrap_or(0);
        depth.insert(node.name.clone(), level);
        order.push(node.clone());

        for &j in &dependents[i] {
            in_degree[j] -= 1;
            if in_degree[j] == 0 {
                ready.push(Reverse(j));
            }
        }
    }

    if order.len() != nodes.len() {
        let cycle = find_cycle(graph).unwrap_or_else(|| CycleError {
            path: nodes
                .iter()
                .enumerate()
                .filter(|(i, _)| in_degree[*i] > 0)
                .map(|(_, n)| n.name.clone())
                .collect(),
        });
        return Err(cycle);
    }

    tracing::debug!(steps = order.len(), "Resolved execution plan");
    Ok(ExecutionPlan {
        steps: order,
        depth,
    })
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Finds one dependency cycle, returned as a closed path (`a -> b -> a`)
pub fn find_cycle(graph: &ResourceGraph) -> Option<CycleError> {
    let nodes = graph.nodes();
    let mut marks = vec![Mark::Unvisited; nodes.len()];

    for root in 0..nodes.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        // Iterative DFS: (node, dependencies, next dependency to visit)
        let mut stack: Vec<(usize, Vec<usize>, usize)> = Vec::new();
        marks[root] = Mark::InProgress;
        stack.push((root, dependency_indices(graph, &nodes[root]), 0));

        while let Some((current, deps, next)) = stack.last_mut() {
            if *next == deps.len() {
                marks[*current] = Mark::Done;
                stack.pop();
                continue;
            }
            let dep = deps[*next];
            *next += 1;
            match marks[dep] {
                Mark::Done => {}
                Mark::InProgress => {
                    let start = stack.iter().position(|(i, _, _)| *i == dep)?;
                    let mut path: Vec<String> = stack[start..]
                        .iter()
                        .map(|(i, _, _)| nodes[*i].name.clone())
                        .collect();
                    path.push(nodes[dep].name.clone());
                    return Some(CycleError { path });
                }
                Mark::Unvisited => {
                    marks[dep] = Mark::InProgress;
                    stack.push((dep, dependency_indices(graph, &nodes[dep]), 0));
                }
            }
        }
    }
    None
}

fn dependency_indices(graph: &ResourceGraph, node: &ResourceNode) -> Vec<usize> {
    node.dependencies()
        .iter()
        .filter_map(|d| graph.position(d))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ResourceKind;

    fn node(name: &str, deps: &[&str]) -> ResourceNode {
        deps.iter().fold(ResourceNode::new(name, ResourceKind::Network), |n, d| {
            n.with_dependency(*d)
        })
    }

    fn graph(nodes: Vec<ResourceNode>) -> ResourceGraph {
        ResourceGraph::from_nodes(nodes).unwrap()
    }

    #[test]
    fn test_network_then_subnet() {
        let g = graph(vec![node("N", &[]), node("S", &["N"])]);
        assert_eq!(resolve(&g).unwrap().names(), vec!["N", "S"]);
    }

    #[test]
    fn test_dependencies_come_first_regardless_of_declaration() {
        let g = graph(vec![
            node("listener", &["lb", "tg"]),
            node("tg", &["vpc"]),
            node("lb", &["subnet"]),
            node("subnet", &["vpc"]),
            node("vpc", &[]),
        ]);
        let plan = resolve(&g).unwrap();
        for step in plan.steps() {
            for dep in step.dependencies() {
                assert!(plan.position(&dep).unwrap() < plan.position(&step.name).unwrap());
            }
        }
        assert_eq!(plan.names(), vec!["vpc", "tg", "subnet", "lb", "listener"]);
    }

    #[test]
    fn test_ties_broken_by_declaration_order() {
        let g = graph(vec![
            node("c", &[]),
            node("a", &[]),
            node("b", &["c"]),
            node("d", &[]),
        ]);
        assert_eq!(resolve(&g).unwrap().names(), vec!["c", "a", "b", "d"]);
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let g = graph(vec![
            node("vpc", &[]),
            node("a", &["vpc"]),
            node("b", &["vpc"]),
            node("sg", &["vpc"]),
            node("lt", &["sg"]),
            node("asg", &["lt", "a", "b"]),
        ]);
        let first = resolve(&g).unwrap().names().join(",");
        for _ in 0..10 {
            assert_eq!(resolve(&g).unwrap().names().join(","), first);
        }
    }

    #[test]
    fn test_layers() {
        let g = graph(vec![
            node("vpc", &[]),
            node("a", &["vpc"]),
            node("b", &["vpc"]),
            node("asg", &["a", "b"]),
        ]);
        let plan = resolve(&g).unwrap();
        assert_eq!(
            plan.layers(),
            vec![vec!["vpc"], vec!["a", "b"], vec!["asg"]]
        );
    }

    #[test]
    fn test_resolve_reports_cycle() {
        let g = graph(vec![
            node("vpc", &[]),
            node("a", &["c"]),
            node("b", &["a"]),
            node("c", &["b"]),
        ]);
        let err = resolve(&g).unwrap_err();
        assert_eq!(err.path.first(), err.path.last());
        assert_eq!(err.path.len(), 4);
        assert!(!err.path.contains(&"vpc".to_string()));
    }

    #[test]
    fn test_find_cycle_none_for_dag() {
        let g = graph(vec![node("a", &[]), node("b", &["a"]), node("c", &["a", "b"])]);
        assert!(find_cycle(&g).is_none());
    }
}
