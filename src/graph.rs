//! Graph utilities: topological order, structural validation, traversal.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use crate::dsl::{EdgeDef, NodeDef, NodeKind, PipelineDefinition};
use crate::error::{CycleError, ValidationIssue};

/// Kahn's algorithm over `(source, target)` pairs. Ties among zero-in-degree
/// nodes are broken by node insertion order.
pub fn topo_sort(nodes: &[NodeDef], edges: &[EdgeDef]) -> Result<Vec<String>, CycleError> {
    let index_of: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    let mut indeg: Vec<usize> = vec![0; nodes.len()];
    let mut outgoing: HashMap<usize, Vec<usize>> = HashMap::new();
    for e in edges {
        let (Some(&from), Some(&to)) = (
            index_of.get(e.source.as_str()),
            index_of.get(e.target.as_str()),
        ) else {
            // Dangling edges are a validation concern, not an ordering one.
            continue;
        };
        indeg[to] += 1;
        outgoing.entry(from).or_default().push(to);
    }

    let mut ready: BinaryHeap<Reverse<usize>> = indeg
        .iter()
        .enumerate()
        .filter_map(|(i, d)| (*d == 0).then_some(Reverse(i)))
        .collect();

    let mut order: Vec<String> = Vec::with_capacity(nodes.len());
    while let Some(Reverse(i)) = ready.pop() {
        order.push(nodes[i].id.clone());
        if let Some(nexts) = outgoing.get(&i) {
            for &m in nexts {
                indeg[m] -= 1;
                if indeg[m] == 0 {
                    ready.push(Reverse(m));
                }
            }
        }
    }

    if order.len() != nodes.len() {
        return Err(CycleError);
    }
    Ok(order)
}

/// Report every structural problem in one pass; never fails fast.
pub fn validate_pipeline(nodes: &[NodeDef], edges: &[EdgeDef]) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    let ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();

    if !nodes.iter().any(|n| n.kind == NodeKind::Input) {
        issues.push(ValidationIssue::new(None, "Pipeline needs an input node"));
    }
    if !nodes.iter().any(|n| n.kind == NodeKind::Output) {
        issues.push(ValidationIssue::new(None, "Pipeline needs an output node"));
    }

    for e in edges {
        if !ids.contains(e.source.as_str()) {
            issues.push(ValidationIssue::new(
                None,
                format!("edge {} references missing node {}", e.id, e.source),
            ));
        }
        if !ids.contains(e.target.as_str()) {
            issues.push(ValidationIssue::new(
                None,
                format!("edge {} references missing node {}", e.id, e.target),
            ));
        }
    }

    // Exactly one producer per (target, targetHandle).
    let mut producers: HashMap<(&str, &str), usize> = HashMap::new();
    for e in edges {
        *producers
            .entry((e.target.as_str(), e.target_handle.as_str()))
            .or_default() += 1;
    }
    for ((target, handle), count) in producers {
        if count > 1 {
            issues.push(ValidationIssue::new(
                Some(target),
                format!("multiple connections into {target}.{handle}"),
            ));
        }
    }

    if topo_sort(nodes, edges).is_err() {
        issues.push(ValidationIssue::new(None, "Pipeline contains a cycle"));
    }

    let has_outgoing: HashSet<&str> = edges.iter().map(|e| e.source.as_str()).collect();
    let has_incoming: HashSet<&str> = edges.iter().map(|e| e.target.as_str()).collect();
    for n in nodes {
        let id = n.id.as_str();
        match n.kind {
            NodeKind::Input => {
                if !has_outgoing.contains(id) {
                    issues.push(ValidationIssue::new(
                        Some(id),
                        "input node has no outgoing connection",
                    ));
                }
            }
            NodeKind::Output => {
                if !has_incoming.contains(id) {
                    issues.push(ValidationIssue::new(
                        Some(id),
                        "output node has no incoming connection",
                    ));
                }
            }
            _ => {
                if !has_incoming.contains(id) {
                    issues.push(ValidationIssue::new(
                        Some(id),
                        "node has no incoming connection",
                    ));
                }
                if !has_outgoing.contains(id) {
                    issues.push(ValidationIssue::new(
                        Some(id),
                        "node has no outgoing connection",
                    ));
                }
            }
        }
    }

    issues
}

pub fn validate(pipeline: &PipelineDefinition) -> Vec<ValidationIssue> {
    validate_pipeline(&pipeline.nodes, &pipeline.edges)
}

/// Direct upstream producers of `node_id`, in edge insertion order.
pub fn upstream_nodes(node_id: &str, edges: &[EdgeDef]) -> Vec<String> {
    edges
        .iter()
        .filter(|e| e.target == node_id)
        .map(|e| e.source.clone())
        .collect()
}

/// Everything reachable downstream of `node_id` (BFS), excluding the seed.
pub fn downstream_nodes(node_id: &str, edges: &[EdgeDef]) -> Vec<String> {
    let mut outgoing: HashMap<&str, Vec<&str>> = HashMap::new();
    for e in edges {
        outgoing
            .entry(e.source.as_str())
            .or_default()
            .push(e.target.as_str());
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    queue.push_back(node_id);
    visited.insert(node_id);

    let mut result = Vec::new();
    while let Some(n) = queue.pop_front() {
        if let Some(nexts) = outgoing.get(n) {
            for &m in nexts {
                if visited.insert(m) {
                    result.push(m.to_string());
                    queue.push_back(m);
                }
            }
        }
    }
    result
}
