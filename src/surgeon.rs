//! Subgraph extraction and stitching.
//!
//! Given the cut points found by the partitioner, the surgeon materializes
//! the cut: every split-point value gets a `Store` in the parent and a `Load`
//! feeding the downstream cone, the cone is cloned into a fresh graph, the
//! parent's copy of the cone is destroyed, and a single `SubGraph` container
//! node takes its place, wired from the stores to the parent's return node.

use std::collections::{HashMap, HashSet};

use crate::diag::DiagSink;
use crate::error::SplitError;
use crate::ir::{Graph, NodeId, ValueId};
use crate::ops::{GraphId, Op, SubGraphSpec};
use crate::partition::build_degree_map;

/// Pairing of a boundary load with the store that feeds it from the parent.
/// A split point that already is a `Load` carries no store.
struct LoadStorePair {
    load: NodeId,
    store: Option<NodeId>,
}

/// Extracts the cone downstream of `split_points` out of `parent` into a new
/// graph registered under `new_graph_id`. The parent is rewritten in place;
/// both graphs are left in topological order.
pub fn extract_subgraph(
    parent: &mut Graph,
    split_points: &[NodeId],
    new_graph_id: GraphId,
    diag: &mut DiagSink,
) -> Result<Graph, SplitError> {
    let mut pairs: Vec<LoadStorePair> = Vec::new();
    for &point in split_points {
        if matches!(parent.op(point), Op::Load) {
            pairs.push(LoadStorePair {
                load: point,
                store: None,
            });
        } else {
            create_load_store_at(parent, point, &mut pairs, diag);
        }
    }

    // Clone every load and its transitive successors into the new graph.
    let mut new_graph = Graph::new(format!("{}.sub", parent.name()));
    let mut node_map: HashMap<NodeId, NodeId> = HashMap::new();
    let mut cloned: HashSet<NodeId> = HashSet::new();
    for pair in &pairs {
        clone_cone(parent, pair.load, &mut new_graph, &mut node_map, &mut cloned);
    }

    let cloned_in_order = cloned_in_parent_order(parent, &node_map);
    rebuild_inputs(parent, &cloned_in_order, &node_map, &mut new_graph, diag);

    // Drop the parent's copy of the cone, then stand a single container node
    // in its place.
    let mut removed: HashSet<NodeId> = HashSet::new();
    for pair in &pairs {
        remove_cone(parent, pair.load, &mut removed)?;
    }

    let store_outputs: Vec<ValueId> = pairs
        .iter()
        .filter_map(|pair| pair.store)
        .map(|store| parent.output(store, 0))
        .collect();
    let container = parent.create_node(
        Op::SubGraph(SubGraphSpec {
            graph: new_graph_id,
        }),
        &store_outputs,
        1,
    );
    parent.insert_node_before(container, parent.return_node());
    let container_out = parent.output(container, 0);
    let ret = parent.return_node();
    parent.add_input(ret, container_out);

    topological_sort(parent);
    topological_sort(&mut new_graph);

    Ok(new_graph)
}

/// Inserts a `Load`/`Store` pair for every output value of `point`: the load
/// replaces all existing uses (placed before the first consumer in graph
/// order), the store consumes the value right after the split point and
/// exposes it under the `.store`-suffixed name.
fn create_load_store_at(
    parent: &mut Graph,
    point: NodeId,
    pairs: &mut Vec<LoadStorePair>,
    diag: &mut DiagSink,
) {
    let outputs: Vec<ValueId> = parent.outputs(point).to_vec();
    for value in outputs {
        let mut first: Option<NodeId> = None;
        for u in parent.uses(value) {
            first = Some(match first {
                Some(seen) if parent.is_before(seen, u.user) => seen,
                _ => u.user,
            });
        }
        let Some(first) = first else {
            diag.warn(format!(
                "split point output `{}` has no consumer; no boundary inserted",
                parent.value_name(value)
            ));
            continue;
        };

        let load = parent.create_node(Op::Load, &[], 1);
        parent.insert_node_before(load, first);
        let load_out = parent.output(load, 0);
        parent.copy_metadata(load_out, value);
        parent.replace_all_uses(value, load_out);

        // The store is created after the use redirection so it keeps the raw
        // value. Its output exists solely so a SubGraph node can consume it.
        let store = parent.create_node(Op::Store, &[value], 1);
        let store_out = parent.output(store, 0);
        parent.copy_metadata(store_out, value);
        let name = format!("{}.store", parent.value_name(value));
        parent.set_unique_name(store_out, name);
        parent.insert_node_after(store, point);

        pairs.push(LoadStorePair {
            load,
            store: Some(store),
        });
    }
}

/// Worklist clone of `root` and everything reachable through its uses. The
/// parent's return node is mapped onto the new graph's own return node, so
/// folding the terminator happens during the ordinary input rebuild.
fn clone_cone(
    parent: &Graph,
    root: NodeId,
    new_graph: &mut Graph,
    node_map: &mut HashMap<NodeId, NodeId>,
    cloned: &mut HashSet<NodeId>,
) {
    let mut worklist = vec![root];
    while let Some(old) = worklist.pop() {
        if !cloned.insert(old) {
            continue;
        }
        if old == parent.return_node() {
            node_map.insert(old, new_graph.return_node());
            continue;
        }

        let clone = new_graph.create_node(parent.op(old).clone(), &[], parent.outputs(old).len());
        new_graph.append_node(clone);
        node_map.insert(old, clone);

        for (index, &value) in parent.outputs(old).iter().enumerate() {
            let clone_out = new_graph.output(clone, index);
            new_graph.set_value_info(clone_out, parent.dims(value).to_vec(), parent.dtype(value));
            for u in parent.uses(value) {
                worklist.push(u.user);
            }
        }
    }
}

/// Cloned nodes in parent graph order, for deterministic edge rebuilding.
fn cloned_in_parent_order(parent: &Graph, node_map: &HashMap<NodeId, NodeId>) -> Vec<NodeId> {
    parent
        .nodes()
        .filter(|node| node_map.contains_key(node))
        .collect()
}

/// Reconnects the cloned nodes: each input edge is looked up through the
/// old-to-new map, selecting the same producer output index the original
/// consumed. Producers outside the clone set (typically values entering the
/// cone through a boundary load) are reported and skipped.
fn rebuild_inputs(
    parent: &Graph,
    cloned_in_order: &[NodeId],
    node_map: &HashMap<NodeId, NodeId>,
    new_graph: &mut Graph,
    diag: &mut DiagSink,
) {
    for &old in cloned_in_order {
        let new_node = node_map[&old];
        for &old_input in parent.inputs(old) {
            let Some((producer, output_index)) = parent.producer(old_input) else {
                diag.warn(format!(
                    "rebuild inputs: `{}` has no producer; edge dropped",
                    parent.value_name(old_input)
                ));
                continue;
            };
            let Some(&new_producer) = node_map.get(&producer) else {
                diag.warn(format!(
                    "rebuild inputs: producer of `{}` was not cloned; edge dropped",
                    parent.value_name(old_input)
                ));
                continue;
            };
            let new_value = new_graph.output(new_producer, output_index);
            new_graph.add_input(new_node, new_value);
        }
    }
}

/// Destroys `root` and its transitive successors in the parent, clearing
/// each consumer's inputs before it is visited. The return node survives
/// (with its inputs cleared once a destroyed producer fed it).
fn remove_cone(
    parent: &mut Graph,
    root: NodeId,
    removed: &mut HashSet<NodeId>,
) -> Result<(), SplitError> {
    let mut worklist = vec![root];
    while let Some(node) = worklist.pop() {
        if node == parent.return_node() {
            continue;
        }
        if !removed.insert(node) {
            continue;
        }

        let users: Vec<NodeId> = parent
            .outputs(node)
            .iter()
            .flat_map(|&value| parent.uses(value).iter().map(|u| u.user))
            .collect();
        for user in users {
            parent.clear_inputs(user);
            worklist.push(user);
        }
        parent.destroy_node(node)?;
    }
    Ok(())
}

/// Stable topological re-sort: Kahn's algorithm with a LIFO worklist seeded
/// in graph order; nodes the traversal never reaches (the return node) keep
/// their relative position at the end.
pub(crate) fn topological_sort(graph: &mut Graph) {
    let ret = graph.return_node();
    let mut degree = build_degree_map(graph);
    let mut worklist: Vec<NodeId> = graph
        .nodes()
        .filter(|&node| node != ret && degree[&node] == 0)
        .collect();

    let mut ordered = Vec::with_capacity(graph.node_count());
    while let Some(node) = worklist.pop() {
        ordered.push(node);
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
    }

    let placed: HashSet<NodeId> = ordered.iter().copied().collect();
    let leftovers: Vec<NodeId> = graph.nodes().filter(|node| !placed.contains(node)).collect();
    ordered.extend(leftovers);
    graph.set_order(ordered);
}
