#![allow(dead_code)]

use tilecut::ir::{Graph, NodeId, ValueId};
use tilecut::ops::{ConvSpec, DType, GemmSpec, Op, PoolSpec};
use tilecut::target::EuAlignedTarget;

/// Reference target with alignment noise removed: sizes are exact element
/// counts times element width.
pub fn unit_target() -> EuAlignedTarget {
    EuAlignedTarget {
        eu_count: 1,
        local_mem: 64 * 1024,
        global_mem: 1 << 30,
    }
}

/// Creates a node, appends it, and stamps its single output with `out_dims`.
pub fn append_op(graph: &mut Graph, op: Op, inputs: &[ValueId], out_dims: Vec<i64>) -> NodeId {
    let node = graph.create_node(op, inputs, 1);
    graph.append_node(node);
    let out = graph.output(node, 0);
    graph.set_value_info(out, out_dims, DType::F32);
    node
}

/// 2-D convolution with square kernel/stride/padding; weight and bias enter
/// as graph parameters.
pub fn conv2d(
    graph: &mut Graph,
    input: ValueId,
    out_channels: i64,
    kernel: i64,
    stride: i64,
    pad: i64,
    out_dims: Vec<i64>,
) -> NodeId {
    let in_channels = graph.dims(input)[1];
    let tag = graph.params().len();
    let weight = graph.add_param(
        format!("w{}", tag),
        vec![out_channels, in_channels, kernel, kernel],
        DType::F32,
    );
    let bias = graph.add_param(format!("b{}", tag), vec![out_channels], DType::F32);
    append_op(
        graph,
        Op::Conv(ConvSpec {
            kernel_shape: vec![kernel, kernel],
            strides: vec![stride, stride],
            pads_begin: vec![pad, pad],
            pads_end: vec![pad, pad],
        }),
        &[input, weight, bias],
        out_dims,
    )
}

pub fn max_pool2d(
    graph: &mut Graph,
    input: ValueId,
    kernel: i64,
    stride: i64,
    pad: i64,
    out_dims: Vec<i64>,
) -> NodeId {
    append_op(
        graph,
        Op::MaxPool(PoolSpec {
            kernel_shape: vec![kernel, kernel],
            strides: vec![stride, stride],
            pads_begin: vec![pad, pad],
            pads_end: vec![pad, pad],
        }),
        &[input],
        out_dims,
    )
}

pub fn gemm(
    graph: &mut Graph,
    a: ValueId,
    b: ValueId,
    c: ValueId,
    trans_a: bool,
    trans_b: bool,
    out_dims: Vec<i64>,
) -> NodeId {
    append_op(
        graph,
        Op::Gemm(GemmSpec { trans_a, trans_b }),
        &[a, b, c],
        out_dims,
    )
}

/// Routes `value` into the graph's return node.
pub fn finish(graph: &mut Graph, value: ValueId) {
    let ret = graph.return_node();
    graph.add_input(ret, value);
}

/// A chain of `len` relu nodes over `input`, all with the input's shape.
/// Returns the node ids in order.
pub fn relu_chain(graph: &mut Graph, input: ValueId, len: usize) -> Vec<NodeId> {
    let dims = graph.dims(input).to_vec();
    let mut nodes = Vec::with_capacity(len);
    let mut current = input;
    for _ in 0..len {
        let node = append_op(graph, Op::Relu, &[current], dims.clone());
        current = graph.output(node, 0);
        nodes.push(node);
    }
    finish(graph, current);
    nodes
}
