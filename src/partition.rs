//! Half-size cut-point discovery.
//!
//! The finder walks the graph topologically, accumulating per-node working
//! set until roughly half of the total has been seen; everything before the
//! frontier forms group A, everything after forms group B. Cut points are
//! the group-A nodes whose values cross into B (plus boundary loads already
//! in B). An empty result means the graph cannot be bisected further.

use std::collections::{HashMap, HashSet};

use crate::error::SplitError;
use crate::ir::{Graph, NodeId};
use crate::ops::Op;
use crate::target::TargetTransformInfo;

/// In-degree of every non-return node, counting only inputs that have a
/// producer (graph parameters impose no ordering).
pub(crate) fn build_degree_map(graph: &Graph) -> HashMap<NodeId, usize> {
    let ret = graph.return_node();
    let mut degree = HashMap::new();
    for node in graph.nodes() {
        if node == ret {
            continue;
        }
        let with_producer = graph
            .inputs(node)
            .iter()
            .filter(|&&value| graph.producer(value).is_some())
            .count();
        degree.insert(node, with_producer);
    }
    degree
}

/// Finds the nodes at which to cut `graph` so that the downstream cone holds
/// roughly half of the estimated working set. Returns an empty list when the
/// graph is indivisible.
pub fn find_half_size_split_points(
    graph: &Graph,
    tti: &dyn TargetTransformInfo,
) -> Result<Vec<NodeId>, SplitError> {
    let ret = graph.return_node();

    let mut node_size: HashMap<NodeId, u64> = HashMap::new();
    let mut total = 0u64;
    for node in graph.nodes() {
        if node == ret || graph.op(node).skip_mem_accounting() {
            continue;
        }
        let size = tti.operator_mem_usage(graph, node).size;
        node_size.insert(node, size);
        total += size;
    }

    let mut degree = build_degree_map(graph);
    let mut worklist: Vec<NodeId> = graph
        .nodes()
        .filter(|&node| node != ret && degree[&node] == 0)
        .collect();

    let mut group_a: HashSet<NodeId> = HashSet::new();
    let mut group_b: HashSet<NodeId> = HashSet::new();
    let mut accumulated = 0u64;
    let mut last_node = None;

    // LIFO worklist: a topological traversal with a DFS flavor, so the
    // frontier tends to fall across a narrow part of the graph.
    while let Some(node) = worklist.pop() {
        for &output in graph.outputs(node) {
            for u in graph.uses(output) {
                if u.user == ret {
                    continue;
                }
                let entry = degree
                    .get_mut(&u.user)
                    .expect("every non-return user is in the degree map");
                *entry -= 1;
                if *entry == 0 {
                    worklist.push(u.user);
                }
            }
        }

        if graph.op(node).skip_mem_accounting() {
            continue;
        }
        if accumulated < total / 2 {
            group_a.insert(node);
        } else {
            group_b.insert(node);
        }
        last_node = Some(node);
        accumulated += node_size[&node];
    }

    if group_b.is_empty() {
        // A single counted node cannot be bisected.
        if group_a.len() <= 1 {
            return Ok(Vec::new());
        }
        let last = last_node.expect("group A is non-empty, so a node was traversed");
        group_a.remove(&last);
        group_b.insert(last);
    }

    // Boundary and container nodes follow their tile-owning neighbor: a load
    // joins its user's group, a store or subgraph joins its producer's.
    for node in graph.nodes() {
        match graph.op(node) {
            Op::Load => {
                let output = graph.output(node, 0);
                let user = graph
                    .uses(output)
                    .first()
                    .ok_or(SplitError::UnpairedLoad { node })?
                    .user;
                if group_a.contains(&user) {
                    group_a.insert(node);
                } else {
                    group_b.insert(node);
                }
            }
            Op::Store | Op::SubGraph(_) => {
                let producer = graph
                    .inputs(node)
                    .first()
                    .and_then(|&value| graph.producer(value))
                    .map(|(producer, _)| producer)
                    .ok_or_else(|| SplitError::UnanchoredBoundary {
                        node,
                        kind: graph.op(node).mnemonic(),
                    })?;
                if group_a.contains(&producer) {
                    group_a.insert(node);
                } else {
                    group_b.insert(node);
                }
            }
            _ => {}
        }
    }

    // Emit split points in graph order: group-A nodes with a use crossing
    // into B, and boundary loads that landed in B.
    let mut points = Vec::new();
    for node in graph.nodes() {
        if group_a.contains(&node) {
            let mut crossing = false;
            for &output in graph.outputs(node) {
                for u in graph.uses(output) {
                    if group_a.contains(&u.user) {
                        continue;
                    }
                    if !group_b.contains(&u.user) {
                        return Err(SplitError::CrossingOutsideGroups { node });
                    }
                    crossing = true;
                }
            }
            if crossing {
                points.push(node);
            }
        } else if matches!(graph.op(node), Op::Load) && group_b.contains(&node) {
            points.push(node);
        }
    }

    Ok(points)
}
