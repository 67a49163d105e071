//! Split state and the manager driving recursive bisection.
//!
//! The manager owns every graph the pass touches: the root graph it was
//! constructed with and each extracted subgraph, addressed by [`GraphId`].
//! For each graph it keeps a [`SplitGraph`]: per-node tile state, the tracked
//! boundary stores whose tiles drive shrinking, and the allocator's verdict.

use std::collections::HashMap;

use crate::diag::DiagSink;
use crate::error::SplitError;
use crate::ir::{Graph, NodeId};
use crate::memory::{value_mem_map, ValueMemMap};
use crate::ops::{GraphId, Op};
use crate::partition::find_half_size_split_points;
use crate::print::render_split_graph;
use crate::shape::{backprop_input_size, classify, TileClass};
use crate::surgeon::extract_subgraph;
use crate::target::TargetTransformInfo;

/// Per-node tile descriptor: the original output shape and the currently
/// proposed one. `skip_mem` marks boundary operators whose bytes are
/// accounted for by a neighbor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitState {
    pub orig_out: Vec<i64>,
    pub new_out: Vec<i64>,
    pub skip_mem: bool,
    pub class: TileClass,
}

pub type NodeStateMap = HashMap<NodeId, SplitState>;

/// The allocator collaborator's verdict for one split graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocStatus {
    pub success: bool,
    pub size: u64,
}

/// Tile bookkeeping over one owned graph.
#[derive(Debug)]
pub struct SplitGraph {
    graph: GraphId,
    states: NodeStateMap,
    stores: Vec<NodeId>,
    split_axis: Vec<usize>,
    split_factor: Vec<i64>,
    alloc: AllocStatus,
}

impl SplitGraph {
    /// Builds the state map for `graph`: one state per node, except the
    /// return node and `SubGraph` containers (which have no tile of their
    /// own). Fails on operators the shape calculus cannot tile.
    fn build(graph_id: GraphId, graph: &Graph) -> Result<Self, SplitError> {
        let mut states = NodeStateMap::new();
        let mut stores = Vec::new();
        let mut split_axis = Vec::new();
        let mut split_factor = Vec::new();

        for node in graph.nodes() {
            if node == graph.return_node() || matches!(graph.op(node), Op::SubGraph(_)) {
                continue;
            }
            let op = graph.op(node);
            let class = classify(op)?;
            let orig_out = graph
                .outputs(node)
                .first()
                .map(|&value| graph.dims(value).to_vec())
                .unwrap_or_default();
            states.insert(
                node,
                SplitState {
                    new_out: orig_out.clone(),
                    orig_out,
                    skip_mem: op.skip_mem_accounting(),
                    class,
                },
            );
            if matches!(op, Op::Store) {
                stores.push(node);
                split_axis.push(0);
                split_factor.push(1);
            }
        }

        Ok(SplitGraph {
            graph: graph_id,
            states,
            stores,
            split_axis,
            split_factor,
            alloc: AllocStatus::default(),
        })
    }

    pub fn graph_id(&self) -> GraphId {
        self.graph
    }

    pub fn states(&self) -> &NodeStateMap {
        &self.states
    }

    pub fn state(&self, node: NodeId) -> Option<&SplitState> {
        self.states.get(&node)
    }

    /// Boundary stores tracked for shrinking, in graph order at build time.
    pub fn stores(&self) -> &[NodeId] {
        &self.stores
    }

    pub fn alloc_status(&self) -> AllocStatus {
        self.alloc
    }
}

/// Root owner of the split graphs produced while bisecting one input graph.
pub struct SplitManager<T: TargetTransformInfo> {
    graphs: Vec<Graph>,
    split_graphs: Vec<SplitGraph>,
    tti: T,
    diag: DiagSink,
}

impl<T: TargetTransformInfo> SplitManager<T> {
    /// Wraps `graph` in an initial split graph with every tile at its
    /// original size.
    pub fn new(graph: Graph, tti: T) -> Result<Self, SplitError> {
        let initial = SplitGraph::build(GraphId(0), &graph)?;
        Ok(SplitManager {
            graphs: vec![graph],
            split_graphs: vec![initial],
            tti,
            diag: DiagSink::new(),
        })
    }

    pub fn target(&self) -> &T {
        &self.tti
    }

    pub fn diagnostics(&self) -> &DiagSink {
        &self.diag
    }

    pub fn graph(&self, id: GraphId) -> &Graph {
        &self.graphs[id.0 as usize]
    }

    /// Split graphs in creation order; index 0 is the root graph.
    pub fn sub_graphs(&self) -> &[SplitGraph] {
        &self.split_graphs
    }

    pub fn sub_graph(&self, index: usize) -> &SplitGraph {
        &self.split_graphs[index]
    }

    /// Attempts one bisection of the split graph at `index`. On success the
    /// extracted subgraph is appended as a new split graph and its index is
    /// returned; `None` means the graph is indivisible and the recursion
    /// should stop.
    pub fn split_new_sub_graph(&mut self, index: usize) -> Result<Option<usize>, SplitError> {
        let parent_id = self.split_graphs[index].graph;
        let points =
            find_half_size_split_points(&self.graphs[parent_id.0 as usize], &self.tti)?;
        if points.is_empty() {
            return Ok(None);
        }

        let new_id = GraphId(self.graphs.len() as u32);
        let new_graph = extract_subgraph(
            &mut self.graphs[parent_id.0 as usize],
            &points,
            new_id,
            &mut self.diag,
        )?;

        // The extraction invalidated the parent's node set; rebuild its
        // states while keeping the allocator's verdict.
        let alloc = self.split_graphs[index].alloc;
        let mut rebuilt = SplitGraph::build(parent_id, &self.graphs[parent_id.0 as usize])?;
        rebuilt.alloc = alloc;
        self.split_graphs[index] = rebuilt;

        let appended = SplitGraph::build(new_id, &new_graph)?;
        self.graphs.push(new_graph);
        self.split_graphs.push(appended);
        Ok(Some(self.split_graphs.len() - 1))
    }

    /// Tightens every tracked store's tile by one step: the current split
    /// factor is incremented along the current axis; an axis that cannot be
    /// divided further advances to the next one with the factor reset; a
    /// store with all axes exhausted is left alone.
    pub fn shrink_size(&mut self, index: usize) -> Result<(), SplitError> {
        let graph_id = self.split_graphs[index].graph;
        for i in 0..self.split_graphs[index].stores.len() {
            let store = self.split_graphs[index].stores[i];
            let orig_dims = {
                let graph = &self.graphs[graph_id.0 as usize];
                graph.dims(graph.input(store, 0)).to_vec()
            };

            let sg = &mut self.split_graphs[index];
            sg.split_factor[i] += 1;
            if sg.split_axis[i] < orig_dims.len() && orig_dims[sg.split_axis[i]] < sg.split_factor[i]
            {
                sg.split_axis[i] += 1;
                sg.split_factor[i] = 1;
            }
            if sg.split_axis[i] >= orig_dims.len() {
                continue;
            }

            let (axis, factor) = (sg.split_axis[i], sg.split_factor[i]);
            self.split_node_by_factor(index, store, axis, factor, true)?;
        }
        Ok(())
    }

    /// Divides the node's proposed output size along `axis` by `factor`
    /// (rounding up), then applies it as the new tile.
    pub fn split_node_by_factor(
        &mut self,
        index: usize,
        node: NodeId,
        axis: usize,
        factor: i64,
        propagate_upward: bool,
    ) -> Result<(), SplitError> {
        let new_out = {
            let state = self.split_graphs[index]
                .states
                .get(&node)
                .ok_or(SplitError::MissingSplitState { node })?;
            let mut out = state.new_out.clone();
            out[axis] = (out[axis] + factor - 1) / factor;
            out
        };
        self.split_node_by_size(index, node, &new_out, propagate_upward)
    }

    /// Sets the node's proposed output tile. With `propagate_upward` the new
    /// requirement flows into each input's producer; propagation stops at
    /// graph parameters and at boundary loads (which have no producers --
    /// their tile is settled by the store they pair with).
    pub fn split_node_by_size(
        &mut self,
        index: usize,
        node: NodeId,
        new_out: &[i64],
        propagate_upward: bool,
    ) -> Result<(), SplitError> {
        let graph_id = self.split_graphs[index].graph;
        let graph = &self.graphs[graph_id.0 as usize];
        let states = &mut self.split_graphs[index].states;
        propagate_tile(graph, states, node, new_out, propagate_upward, &mut self.diag)
    }

    /// Reverts every tile to its original size and resets the per-store
    /// axis/factor walk.
    pub fn reset_to_orig_size(&mut self, index: usize) {
        let sg = &mut self.split_graphs[index];
        for state in sg.states.values_mut() {
            state.new_out = state.orig_out.clone();
        }
        for i in 0..sg.stores.len() {
            sg.split_axis[i] = 0;
            sg.split_factor[i] = 1;
        }
    }

    /// Records the allocator's verdict for the split graph at `index`.
    pub fn set_alloc_status(&mut self, index: usize, success: bool, size: u64) {
        self.split_graphs[index].alloc = AllocStatus { success, size };
    }

    /// Value-level working set of the split graph at `index` under its
    /// current tiles.
    pub fn mem_usage(&mut self, index: usize) -> ValueMemMap {
        let graph_id = self.split_graphs[index].graph;
        value_mem_map(
            &self.graphs[graph_id.0 as usize],
            &self.split_graphs[index].states,
            &self.tti,
            &mut self.diag,
        )
    }

    /// Renders every split graph with its allocation status and tile sizes.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for sg in &self.split_graphs {
            render_split_graph(&self.graphs[sg.graph.0 as usize], sg, &self.tti, &mut out);
        }
        out
    }
}

fn propagate_tile(
    graph: &Graph,
    states: &mut NodeStateMap,
    node: NodeId,
    new_out: &[i64],
    propagate_upward: bool,
    diag: &mut DiagSink,
) -> Result<(), SplitError> {
    let state = states
        .get_mut(&node)
        .ok_or(SplitError::MissingSplitState { node })?;
    state.new_out = new_out.to_vec();
    if !propagate_upward {
        return Ok(());
    }
    let orig_out = state.orig_out.clone();
    let new_out = state.new_out.clone();

    for (index, &input) in graph.inputs(node).iter().enumerate() {
        if let Some((child, _)) = graph.producer(input) {
            let new_in = backprop_input_size(graph, node, &new_out, &orig_out, index, diag);
            propagate_tile(graph, states, child, &new_in, true, diag)?;
        }
    }
    Ok(())
}
