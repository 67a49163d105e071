mod common;

use common::{append_op, conv2d, finish, unit_target};
use tilecut::error::SplitError;
use tilecut::ir::Graph;
use tilecut::ops::{ConcatSpec, DType, Op};
use tilecut::split::SplitManager;

fn conv_relu_graph() -> Graph {
    let mut graph = Graph::new("net");
    let x = graph.add_param("x", vec![1, 3, 8, 8], DType::F32);
    let conv = conv2d(&mut graph, x, 4, 3, 1, 1, vec![1, 4, 8, 8]);
    let conv_out = graph.output(conv, 0);
    let relu = append_op(&mut graph, Op::Relu, &[conv_out], vec![1, 4, 8, 8]);
    let relu_out = graph.output(relu, 0);
    finish(&mut graph, relu_out);
    graph
}

#[test]
fn construction_rejects_untileable_operators() {
    let mut graph = Graph::new("bad");
    let x = graph.add_param("x", vec![1, 4], DType::F32);
    let y = graph.add_param("y", vec![1, 4], DType::F32);
    let concat = append_op(
        &mut graph,
        Op::Concat(ConcatSpec { axis: 1 }),
        &[x, y],
        vec![2, 4],
    );
    let concat_out = graph.output(concat, 0);
    finish(&mut graph, concat_out);

    match SplitManager::new(graph, unit_target()) {
        Err(SplitError::UnsupportedOperator { kind }) => assert_eq!(kind, "concat"),
        other => panic!("expected an unsupported-operator error, got {:?}", other.err()),
    }
}

#[test]
fn split_appends_one_sub_graph_then_reports_indivisible() {
    let mut manager = SplitManager::new(conv_relu_graph(), unit_target()).expect("tileable graph");
    assert_eq!(manager.sub_graphs().len(), 1);

    let appended = manager.split_new_sub_graph(0).expect("split succeeds");
    assert_eq!(appended, Some(1));
    assert_eq!(manager.sub_graphs().len(), 2);

    // The parent kept only the upstream half; neither side can halve again.
    assert_eq!(manager.split_new_sub_graph(0).expect("parent is valid"), None);
    assert_eq!(manager.split_new_sub_graph(1).expect("child is valid"), None);
    assert_eq!(manager.sub_graphs().len(), 2);
}

#[test]
fn parent_rebuild_tracks_the_new_store() {
    let mut manager = SplitManager::new(conv_relu_graph(), unit_target()).expect("tileable graph");
    assert!(manager.sub_graph(0).stores().is_empty());

    manager.split_new_sub_graph(0).expect("split succeeds");

    let parent = manager.sub_graph(0);
    assert_eq!(parent.stores().len(), 1, "the cut produced one store");
    let graph = manager.graph(parent.graph_id());
    let store = parent.stores()[0];
    assert!(matches!(graph.op(store), Op::Store));
}

#[test]
fn shrink_walks_axes_and_propagates_upward() {
    let mut manager = SplitManager::new(conv_relu_graph(), unit_target()).expect("tileable graph");
    manager.split_new_sub_graph(0).expect("split succeeds");

    let store = manager.sub_graph(0).stores()[0];
    let conv = {
        let graph = manager.graph(manager.sub_graph(0).graph_id());
        graph
            .producer(graph.input(store, 0))
            .expect("store input has a producer")
            .0
    };

    // First step: the batch axis (extent 1) is exhausted immediately, so the
    // walk advances to the channel axis with the factor reset to one.
    manager.shrink_size(0).expect("shrink succeeds");
    let state = manager.sub_graph(0).state(store).expect("store has a state");
    assert_eq!(state.new_out, vec![1, 4, 8, 8]);

    // Second step: channel axis divides by two, and the requirement flows
    // into the producing convolution.
    manager.shrink_size(0).expect("shrink succeeds");
    let state = manager.sub_graph(0).state(store).expect("store has a state");
    assert_eq!(state.new_out, vec![1, 2, 8, 8]);
    let conv_state = manager.sub_graph(0).state(conv).expect("conv has a state");
    assert_eq!(conv_state.new_out, vec![1, 2, 8, 8]);
}

#[test]
fn reset_restores_original_tiles() {
    let mut manager = SplitManager::new(conv_relu_graph(), unit_target()).expect("tileable graph");
    manager.split_new_sub_graph(0).expect("split succeeds");
    manager.shrink_size(0).expect("shrink succeeds");
    manager.shrink_size(0).expect("shrink succeeds");

    manager.reset_to_orig_size(0);
    for state in manager.sub_graph(0).states().values() {
        assert_eq!(state.new_out, state.orig_out);
    }
}

#[test]
fn split_by_current_size_is_a_no_op() {
    let mut manager = SplitManager::new(conv_relu_graph(), unit_target()).expect("tileable graph");
    let graph = manager.graph(manager.sub_graph(0).graph_id());
    let conv = graph
        .nodes()
        .find(|&n| matches!(graph.op(n), Op::Conv(_)))
        .expect("conv exists");
    let before = manager.sub_graph(0).states().clone();

    let current = before[&conv].new_out.clone();
    manager
        .split_node_by_size(0, conv, &current, false)
        .expect("node has a state");
    assert_eq!(manager.sub_graph(0).states(), &before);
}

#[test]
fn alloc_status_survives_a_parent_rebuild() {
    let mut manager = SplitManager::new(conv_relu_graph(), unit_target()).expect("tileable graph");
    manager.set_alloc_status(0, true, 4096);

    manager.split_new_sub_graph(0).expect("split succeeds");

    let status = manager.sub_graph(0).alloc_status();
    assert!(status.success);
    assert_eq!(status.size, 4096);
    assert!(!manager.sub_graph(1).alloc_status().success);
}

#[test]
fn mem_usage_sizes_values_under_current_tiles() {
    let mut manager = SplitManager::new(conv_relu_graph(), unit_target()).expect("tileable graph");
    let graph = manager.graph(manager.sub_graph(0).graph_id());
    let x = graph.params()[0];
    let conv = graph
        .nodes()
        .find(|&n| matches!(graph.op(n), Op::Conv(_)))
        .expect("conv exists");
    let conv_out = graph.output(conv, 0);

    let map = manager.mem_usage(0);
    // x: 1*3*8*8 f32 elements.
    assert_eq!(map[&x].size, 3 * 8 * 8 * 4);
    // conv output: 1*4*8*8 f32 elements.
    assert_eq!(map[&conv_out].size, 4 * 8 * 8 * 4);
}

#[test]
fn dump_renders_every_split_graph() {
    let mut manager = SplitManager::new(conv_relu_graph(), unit_target()).expect("tileable graph");
    manager.split_new_sub_graph(0).expect("split succeeds");

    let dump = manager.dump();
    assert!(dump.contains("conv"));
    assert!(dump.contains("subgraph"));
    assert!(dump.contains("load"));
    assert!(dump.contains("allocation failed"));
}
