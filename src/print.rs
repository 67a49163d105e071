//! Human-readable dump of split graphs and their proposed tiles.

use std::fmt::Write;

use crate::diag::DiagSink;
use crate::ir::{Graph, ValueId};
use crate::ops::Op;
use crate::shape::backprop_input_size;
use crate::split::SplitGraph;
use crate::target::TargetTransformInfo;

fn attr_summary(op: &Op) -> String {
    match op {
        Op::Conv(spec) => format!(
            " kernel_shape={:?} strides={:?} pads={:?}/{:?}",
            spec.kernel_shape, spec.strides, spec.pads_begin, spec.pads_end
        ),
        Op::MaxPool(spec) | Op::AveragePool(spec) => format!(
            " kernel_shape={:?} strides={:?} pads={:?}/{:?}",
            spec.kernel_shape, spec.strides, spec.pads_begin, spec.pads_end
        ),
        Op::Gemm(spec) => format!(" trans_a={} trans_b={}", spec.trans_a, spec.trans_b),
        Op::Lrn(spec) => format!(" size={}", spec.size),
        Op::Concat(spec) => format!(" axis={}", spec.axis),
        Op::Transpose(spec) => format!(" perm={:?}", spec.perm),
        Op::SubGraph(spec) => format!(" graph={}", spec.graph.0),
        _ => String::new(),
    }
}

fn write_sizes(out: &mut String, graph: &Graph, values: &[ValueId], tiles: &[Vec<i64>]) {
    for (value, tile) in values.iter().zip(tiles) {
        let _ = writeln!(
            out,
            "    {:<16} {:?} -> {:?}",
            graph.value_name(*value),
            graph.dims(*value),
            tile
        );
    }
}

/// Renders one split graph: allocation status, per-node attributes, original
/// and proposed value sizes, and old/new working-set totals.
pub fn render_split_graph(
    graph: &Graph,
    sg: &SplitGraph,
    tti: &dyn TargetTransformInfo,
    out: &mut String,
) {
    let alloc = sg.alloc_status();
    let _ = writeln!(
        out,
        "graph {} (allocation {} with size {})",
        graph.name(),
        if alloc.success { "succeeded" } else { "failed" },
        alloc.size
    );

    // Printing must not pollute the manager's diagnostic record.
    let mut scratch = DiagSink::new();
    let mut graph_old = 0u64;
    let mut graph_new = 0u64;

    for node in graph.nodes() {
        if node == graph.return_node() {
            continue;
        }
        let op = graph.op(node);
        if matches!(op, Op::SubGraph(_)) {
            let _ = writeln!(out, "  {}:{}", op.mnemonic(), attr_summary(op));
            continue;
        }
        let Some(state) = sg.state(node) else {
            continue;
        };

        let _ = writeln!(out, "  {}:{}", op.mnemonic(), attr_summary(op));

        let input_tiles: Vec<Vec<i64>> = (0..graph.inputs(node).len())
            .map(|index| {
                backprop_input_size(graph, node, &state.new_out, &state.orig_out, index, &mut scratch)
            })
            .collect();
        let output_tiles: Vec<Vec<i64>> =
            vec![state.new_out.clone(); graph.outputs(node).len()];

        let _ = writeln!(out, "  inputs:");
        write_sizes(out, graph, graph.inputs(node), &input_tiles);
        let _ = writeln!(out, "  outputs:");
        write_sizes(out, graph, graph.outputs(node), &output_tiles);

        if state.skip_mem {
            continue;
        }
        let old = tti.operator_mem_usage(graph, node);
        let new = tti.operator_mem_usage_resized(graph, node, &input_tiles, &output_tiles);
        graph_old += old.size;
        graph_new += new.size;
        let _ = writeln!(
            out,
            "  total: {:.1} kb -> {:.1} kb",
            old.size as f64 / 1024.0,
            new.size as f64 / 1024.0
        );
    }

    let _ = writeln!(
        out,
        "graph total size: {:.1} kb -> {:.1} kb",
        graph_old as f64 / 1024.0,
        graph_new as f64 / 1024.0
    );
}
