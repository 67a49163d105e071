//! Tile-shape back-propagation.
//!
//! Given a node and a proposed output tile, compute the slice of each input
//! needed to produce it. The calculus is a pure function over the operator
//! kind, its attributes, and the original value shapes; it never fails.
//! Conditions that make the produced tile suspect (non-divisible reshape
//! factors, unexpected ranks) are reported to the diagnostic sink and the
//! calculus falls back to the original sizes, leaving rejection to the
//! allocator downstream.

use crate::diag::DiagSink;
use crate::error::SplitError;
use crate::ir::{Graph, NodeId};
use crate::ops::Op;

/// Back-propagation rule selected for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileClass {
    /// Output tile equals input tile (element-wise and shape-preserving ops).
    Identity,
    /// Load/Store boundary operators: identity rule, skipped by accounting.
    Boundary,
    Conv,
    Pool,
    Gemm,
    Reshape,
}

/// Selects the rule for a node's operator, failing on operators the calculus
/// cannot tile.
pub fn classify(op: &Op) -> Result<TileClass, SplitError> {
    if op.preserves_shape() {
        return Ok(TileClass::Identity);
    }
    if op.is_boundary() {
        return Ok(TileClass::Boundary);
    }
    match op {
        Op::Conv(_) => Ok(TileClass::Conv),
        Op::MaxPool(_) | Op::AveragePool(_) => Ok(TileClass::Pool),
        Op::Gemm(_) => Ok(TileClass::Gemm),
        Op::Reshape => Ok(TileClass::Reshape),
        _ => Err(SplitError::UnsupportedOperator {
            kind: op.mnemonic(),
        }),
    }
}

/// Computes the input tile `node` needs at `input_index` to produce
/// `new_out`. `orig_out` is the node's original output shape (consulted by
/// the reshape rule).
pub fn backprop_input_size(
    graph: &Graph,
    node: NodeId,
    new_out: &[i64],
    orig_out: &[i64],
    input_index: usize,
    diag: &mut DiagSink,
) -> Vec<i64> {
    match graph.op(node) {
        Op::Conv(spec) => conv_input_size(
            graph,
            node,
            new_out,
            input_index,
            &spec.kernel_shape,
            &spec.strides,
            &spec.pads_begin,
            &spec.pads_end,
            diag,
        ),
        Op::MaxPool(spec) | Op::AveragePool(spec) => pool_input_size(
            new_out,
            &spec.kernel_shape,
            &spec.strides,
            &spec.pads_begin,
            &spec.pads_end,
        ),
        Op::Gemm(spec) => gemm_input_size(graph, node, new_out, input_index, spec.trans_a, spec.trans_b),
        Op::Reshape => reshape_input_size(graph, node, new_out, orig_out, input_index, diag),
        // Identity and boundary operators: the input tile is the output tile.
        _ => new_out.to_vec(),
    }
}

/// Convolution geometry:
///   input 0 `X (N, C, D1..Dn)`, input 1 `W (M, C, k1..kn)`, input 2 `B (M)`.
/// For an output tile `(N', M', Y1'..Yn')` the data tile is
/// `X_i' = (Y_i' - 1)*s_i - pad_begin_i - pad_end_i + k_i`; only the
/// output-channel axis of the weight shrinks.
#[allow(clippy::too_many_arguments)]
fn conv_input_size(
    graph: &Graph,
    node: NodeId,
    new_out: &[i64],
    input_index: usize,
    kernel: &[i64],
    strides: &[i64],
    pads_begin: &[i64],
    pads_end: &[i64],
    diag: &mut DiagSink,
) -> Vec<i64> {
    match input_index {
        0 => {
            let x_dims = graph.dims(graph.input(node, 0));
            let mut tile = vec![0; x_dims.len()];
            tile[0] = new_out[0];
            tile[1] = x_dims[1];
            for axis in 0..x_dims.len().saturating_sub(2) {
                tile[axis + 2] = (new_out[axis + 2] - 1) * strides[axis] - pads_begin[axis]
                    - pads_end[axis]
                    + kernel[axis];
            }
            tile
        }
        1 => {
            let w_dims = graph.dims(graph.input(node, 1));
            let mut tile = w_dims.to_vec();
            tile[0] = new_out[1];
            tile
        }
        2 => vec![new_out[1]],
        _ => {
            diag.warn(format!(
                "convolution has no input {}; returning the output tile",
                input_index
            ));
            new_out.to_vec()
        }
    }
}

/// Pooling geometry: first two axes copy the output tile, window axes use
/// `X_i' = Y_i'*s_i - pad_begin_i - pad_end_i + 2*(k_i/2)`.
fn pool_input_size(
    new_out: &[i64],
    kernel: &[i64],
    strides: &[i64],
    pads_begin: &[i64],
    pads_end: &[i64],
) -> Vec<i64> {
    let mut tile = vec![0; new_out.len()];
    tile[0] = new_out[0];
    tile[1] = new_out[1];
    for axis in 0..new_out.len().saturating_sub(2) {
        tile[axis + 2] = new_out[axis + 2] * strides[axis] - pads_begin[axis] - pads_end[axis]
            + 2 * (kernel[axis] / 2);
    }
    tile
}

/// Gemm contraction: `A (M, K)` (or transposed), `B (K, N)` (or transposed),
/// `C (M, N)`. The contraction axis K never splits; C keeps its original
/// sizes.
fn gemm_input_size(
    graph: &Graph,
    node: NodeId,
    new_out: &[i64],
    input_index: usize,
    trans_a: bool,
    trans_b: bool,
) -> Vec<i64> {
    let a_dims = graph.dims(graph.input(node, 0));
    let k = if trans_a { a_dims[0] } else { a_dims[1] };
    match input_index {
        0 => {
            if trans_a {
                vec![k, new_out[0]]
            } else {
                vec![new_out[0], k]
            }
        }
        1 => {
            if trans_b {
                vec![new_out[1], k]
            } else {
                vec![k, new_out[1]]
            }
        }
        _ => graph.dims(graph.input(node, input_index)).to_vec(),
    }
}

/// Reshape only supports the collapsed `(N, C, H, W) -> (N, L)` form. The
/// channel axis absorbs the shrink factor `prod(orig_out[1..]) /
/// prod(new_out[1..])`; trailing axes keep their original extents. Anything
/// else warns and gives up by returning the original input sizes.
fn reshape_input_size(
    graph: &Graph,
    node: NodeId,
    new_out: &[i64],
    orig_out: &[i64],
    input_index: usize,
    diag: &mut DiagSink,
) -> Vec<i64> {
    // Input 1 is the target-shape tensor; it has no data tile.
    if input_index == 1 {
        return Vec::new();
    }

    let in_dims = graph.dims(graph.input(node, 0));
    if orig_out.len() != 2 || in_dims.len() < 2 {
        diag.warn(format!(
            "reshape of rank {} output from rank {} input is not splittable; keeping original input sizes",
            orig_out.len(),
            in_dims.len()
        ));
        return in_dims.to_vec();
    }

    let orig_tail: i64 = orig_out[1..].iter().product();
    let new_tail: i64 = new_out[1..].iter().product();
    if new_tail == 0 {
        diag.warn("reshape output tile has a zero-sized axis; keeping original input sizes");
        return in_dims.to_vec();
    }
    if orig_tail % new_tail != 0 {
        diag.warn(format!(
            "reshape shrink factor is not integral: {} % {} != 0",
            orig_tail, new_tail
        ));
    }
    let factor = orig_tail / new_tail;
    if factor == 0 {
        diag.warn(format!(
            "reshape output tile {:?} is larger than the original {:?}; keeping original input sizes",
            new_out, orig_out
        ));
        return in_dims.to_vec();
    }
    if in_dims[1] % factor != 0 {
        diag.warn(format!(
            "reshape channel axis does not divide by the shrink factor: {} % {} != 0",
            in_dims[1], factor
        ));
    }

    let mut tile = in_dims.to_vec();
    tile[0] = new_out[0];
    tile[1] = in_dims[1] / factor;
    tile
}
