mod common;

use common::{append_op, conv2d, finish, gemm, max_pool2d};
use tilecut::diag::DiagSink;
use tilecut::error::SplitError;
use tilecut::ir::Graph;
use tilecut::ops::{ConcatSpec, DType, Op};
use tilecut::shape::{backprop_input_size, classify, TileClass};

#[test]
fn conv_recurrence_matches_windowed_geometry() {
    let mut graph = Graph::new("conv");
    let x = graph.add_param("x", vec![10, 3, 224, 224], DType::F32);
    let conv = conv2d(&mut graph, x, 64, 3, 1, 1, vec![10, 64, 224, 224]);
    let conv_out = graph.output(conv, 0);
    finish(&mut graph, conv_out);

    let orig_out = vec![10, 64, 224, 224];
    let new_out = vec![10, 64, 112, 224];
    let mut diag = DiagSink::new();

    let data_tile = backprop_input_size(&graph, conv, &new_out, &orig_out, 0, &mut diag);
    assert_eq!(data_tile, vec![10, 3, 112, 224]);

    let weight_tile = backprop_input_size(&graph, conv, &new_out, &orig_out, 1, &mut diag);
    assert_eq!(weight_tile, vec![64, 3, 3, 3]);

    let bias_tile = backprop_input_size(&graph, conv, &new_out, &orig_out, 2, &mut diag);
    assert_eq!(bias_tile, vec![64]);

    assert!(diag.is_empty(), "clean geometry should not warn");
}

#[test]
fn conv_identity_tile_reproduces_original_input() {
    let mut graph = Graph::new("conv");
    let x = graph.add_param("x", vec![10, 3, 224, 224], DType::F32);
    let conv = conv2d(&mut graph, x, 64, 3, 1, 1, vec![10, 64, 224, 224]);
    let conv_out = graph.output(conv, 0);
    finish(&mut graph, conv_out);

    let orig_out = vec![10, 64, 224, 224];
    let mut diag = DiagSink::new();
    let tile = backprop_input_size(&graph, conv, &orig_out, &orig_out, 0, &mut diag);
    assert_eq!(tile, vec![10, 3, 224, 224]);
}

#[test]
fn conv_input_tile_never_exceeds_original() {
    let mut graph = Graph::new("conv");
    let x = graph.add_param("x", vec![4, 8, 64, 64], DType::F32);
    let conv = conv2d(&mut graph, x, 16, 5, 1, 2, vec![4, 16, 64, 64]);
    let conv_out = graph.output(conv, 0);
    finish(&mut graph, conv_out);

    let orig_out = vec![4, 16, 64, 64];
    let mut diag = DiagSink::new();
    for height in [8, 16, 33, 64] {
        let new_out = vec![4, 16, height, 64];
        let tile = backprop_input_size(&graph, conv, &new_out, &orig_out, 0, &mut diag);
        assert!(
            tile[2] <= 64,
            "tile height {} escapes the original extent",
            tile[2]
        );
    }
}

#[test]
fn gemm_keeps_contraction_axis_whole() {
    let mut graph = Graph::new("gemm");
    let a = graph.add_param("a", vec![10, 9216], DType::F32);
    let b = graph.add_param("b", vec![4096, 9216], DType::F32);
    let c = graph.add_param("c", vec![10, 4096], DType::F32);
    let node = gemm(&mut graph, a, b, c, false, true, vec![10, 4096]);
    let node_out = graph.output(node, 0);
    finish(&mut graph, node_out);

    let orig_out = vec![10, 4096];
    let new_out = vec![10, 1024];
    let mut diag = DiagSink::new();

    assert_eq!(
        backprop_input_size(&graph, node, &new_out, &orig_out, 0, &mut diag),
        vec![10, 9216]
    );
    assert_eq!(
        backprop_input_size(&graph, node, &new_out, &orig_out, 1, &mut diag),
        vec![1024, 9216],
        "transposed B shrinks only along its leading axis"
    );
    assert_eq!(
        backprop_input_size(&graph, node, &new_out, &orig_out, 2, &mut diag),
        vec![10, 4096],
        "C stays at its original sizes"
    );
}

#[test]
fn pool_tile_doubles_under_stride_two_window() {
    let mut graph = Graph::new("pool");
    let x = graph.add_param("x", vec![1, 16, 56, 56], DType::F32);
    let pool = max_pool2d(&mut graph, x, 3, 2, 1, vec![1, 16, 28, 28]);
    let pool_out = graph.output(pool, 0);
    finish(&mut graph, pool_out);

    let orig_out = vec![1, 16, 28, 28];
    let new_out = vec![1, 16, 14, 28];
    let mut diag = DiagSink::new();
    let tile = backprop_input_size(&graph, pool, &new_out, &orig_out, 0, &mut diag);
    assert_eq!(tile, vec![1, 16, 28, 56]);
}

#[test]
fn reshape_shrink_factor_lands_on_channel_axis() {
    let mut graph = Graph::new("reshape");
    let x = graph.add_param("x", vec![10, 256, 6, 6], DType::F32);
    let shape = graph.add_param("shape", vec![2], DType::I32);
    let node = append_op(&mut graph, Op::Reshape, &[x, shape], vec![10, 9216]);
    let node_out = graph.output(node, 0);
    finish(&mut graph, node_out);

    let orig_out = vec![10, 9216];
    let new_out = vec![10, 4608];
    let mut diag = DiagSink::new();

    let tile = backprop_input_size(&graph, node, &new_out, &orig_out, 0, &mut diag);
    assert_eq!(tile, vec![10, 128, 6, 6]);
    assert!(diag.is_empty());

    assert_eq!(
        backprop_input_size(&graph, node, &new_out, &orig_out, 1, &mut diag),
        Vec::<i64>::new(),
        "the target-shape tensor has no data tile"
    );
}

#[test]
fn reshape_warns_on_non_integral_factor() {
    let mut graph = Graph::new("reshape");
    let x = graph.add_param("x", vec![10, 256, 6, 6], DType::F32);
    let shape = graph.add_param("shape", vec![2], DType::I32);
    let node = append_op(&mut graph, Op::Reshape, &[x, shape], vec![10, 9216]);
    let node_out = graph.output(node, 0);
    finish(&mut graph, node_out);

    let orig_out = vec![10, 9216];
    let new_out = vec![10, 5000];
    let mut diag = DiagSink::new();
    let tile = backprop_input_size(&graph, node, &new_out, &orig_out, 0, &mut diag);

    assert_eq!(tile, vec![10, 256, 6, 6], "factor truncates to one");
    assert!(
        diag.warnings().count() > 0,
        "non-integral shrink factor must be reported"
    );
}

#[test]
fn identity_rule_passes_tile_through() {
    let mut graph = Graph::new("relu");
    let x = graph.add_param("x", vec![2, 8, 4, 4], DType::F32);
    let relu = append_op(&mut graph, Op::Relu, &[x], vec![2, 8, 4, 4]);
    let relu_out = graph.output(relu, 0);
    finish(&mut graph, relu_out);

    let orig_out = vec![2, 8, 4, 4];
    let new_out = vec![2, 8, 2, 4];
    let mut diag = DiagSink::new();
    assert_eq!(
        backprop_input_size(&graph, relu, &new_out, &orig_out, 0, &mut diag),
        new_out
    );
}

#[test]
fn registry_classifies_operators() {
    assert_eq!(classify(&Op::Relu), Ok(TileClass::Identity));
    assert_eq!(classify(&Op::Load), Ok(TileClass::Boundary));
    assert_eq!(classify(&Op::Store), Ok(TileClass::Boundary));
    assert_eq!(classify(&Op::Reshape), Ok(TileClass::Reshape));
    assert_eq!(
        classify(&Op::Concat(ConcatSpec { axis: 1 })),
        Err(SplitError::UnsupportedOperator { kind: "concat" })
    );
}
