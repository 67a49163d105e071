//! Working-set accounting for a split graph.

use std::collections::HashMap;

use crate::diag::DiagSink;
use crate::ir::{Graph, ValueId};
use crate::shape::backprop_input_size;
use crate::split::NodeStateMap;
use crate::target::{MemSize, TargetTransformInfo};

/// Per-value memory requirement under the current tiles. Consumed by the
/// outer allocator when probing whether a split graph fits local memory.
pub type ValueMemMap = HashMap<ValueId, MemSize>;

/// Computes the value-level memory map for a graph under the proposed tiles
/// in `states`.
///
/// Boundary operators contribute nothing: their transfers are already
/// accounted for by the producer or consumer that owns the tile. Values
/// shared between a producer and a consumer are sized by the consumer (the
/// last writer in graph order wins).
pub fn value_mem_map(
    graph: &Graph,
    states: &NodeStateMap,
    tti: &dyn TargetTransformInfo,
    diag: &mut DiagSink,
) -> ValueMemMap {
    let mut map = ValueMemMap::new();
    for node in graph.nodes() {
        let Some(state) = states.get(&node) else {
            continue;
        };
        if state.skip_mem {
            continue;
        }
        for (index, &input) in graph.inputs(node).iter().enumerate() {
            let tile = backprop_input_size(graph, node, &state.new_out, &state.orig_out, index, diag);
            map.insert(input, tti.operator_input_mem_usage(graph, node, index, &tile));
        }
        for (index, &output) in graph.outputs(node).iter().enumerate() {
            map.insert(
                output,
                tti.operator_output_mem_usage(graph, node, index, &state.new_out),
            );
        }
    }
    map
}
