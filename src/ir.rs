//! Mutable graph arena with stable handles.
//!
//! Nodes and values live in slot arenas addressed by [`NodeId`] and
//! [`ValueId`]; cross-references (producer links, use lists) are handles, not
//! pointers. A position index kept in step with every insertion and removal
//! makes `is_before` an O(1) query.

use std::collections::HashMap;
use std::mem;

use smallvec::SmallVec;
use thiserror::Error;

use crate::ops::{DType, Op};

/// Stable identifier for a node in one graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Stable identifier for a value in one graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

/// One consumer of a value: the using node and the input slot it occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Use {
    pub user: NodeId,
    pub index: usize,
}

#[derive(Debug)]
struct Value {
    name: String,
    dims: Vec<i64>,
    dtype: DType,
    producer: Option<(NodeId, usize)>,
    uses: SmallVec<[Use; 4]>,
}

#[derive(Debug)]
struct Node {
    op: Op,
    inputs: Vec<ValueId>,
    outputs: Vec<ValueId>,
}

/// Errors surfaced by the graph arena.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IrError {
    #[error("node {node:?} still has live uses and cannot be destroyed")]
    DestroyWithLiveUses { node: NodeId },
    #[error("value {value:?} is used by node {node:?} before it is defined")]
    UseBeforeDef { value: ValueId, node: NodeId },
}

/// A computation graph: an ordered node sequence plus a distinguished,
/// non-destroyable return node. Graph parameters are producer-less values.
#[derive(Debug)]
pub struct Graph {
    name: String,
    nodes: Vec<Option<Node>>,
    values: Vec<Option<Value>>,
    order: Vec<NodeId>,
    pos: HashMap<NodeId, usize>,
    params: Vec<ValueId>,
    ret: NodeId,
}

impl Graph {
    /// Creates an empty graph holding only its return node.
    pub fn new(name: impl Into<String>) -> Self {
        let mut graph = Graph {
            name: name.into(),
            nodes: Vec::new(),
            values: Vec::new(),
            order: Vec::new(),
            pos: HashMap::new(),
            params: Vec::new(),
            ret: NodeId(0),
        };
        let ret = graph.alloc_node(Op::Return, &[], 0);
        graph.insert_at(ret, 0);
        graph.ret = ret;
        graph
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn return_node(&self) -> NodeId {
        self.ret
    }

    pub fn params(&self) -> &[ValueId] {
        &self.params
    }

    /// Declares a graph parameter: a value no node produces.
    pub fn add_param(&mut self, name: impl Into<String>, dims: Vec<i64>, dtype: DType) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(Some(Value {
            name: name.into(),
            dims,
            dtype,
            producer: None,
            uses: SmallVec::new(),
        }));
        self.params.push(id);
        id
    }

    /// Creates a node with fresh output values. The node is not yet placed in
    /// the graph order; follow up with [`Graph::append_node`],
    /// [`Graph::insert_node_before`], or [`Graph::insert_node_after`].
    pub fn create_node(&mut self, op: Op, inputs: &[ValueId], output_count: usize) -> NodeId {
        debug_assert!(
            !matches!(op, Op::Return),
            "the return node is created with the graph"
        );
        self.alloc_node(op, inputs, output_count)
    }

    fn alloc_node(&mut self, op: Op, inputs: &[ValueId], output_count: usize) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let mut outputs = Vec::with_capacity(output_count);
        for index in 0..output_count {
            let value = ValueId(self.values.len() as u32);
            self.values.push(Some(Value {
                name: format!("t{}", value.0),
                dims: Vec::new(),
                dtype: DType::F32,
                producer: Some((id, index)),
                uses: SmallVec::new(),
            }));
            outputs.push(value);
        }
        for (index, &input) in inputs.iter().enumerate() {
            self.value_mut(input).uses.push(Use { user: id, index });
        }
        self.nodes.push(Some(Node {
            op,
            inputs: inputs.to_vec(),
            outputs,
        }));
        id
    }

    /// Places a created node at the end of the graph, before the return node.
    pub fn append_node(&mut self, node: NodeId) {
        let at = self.position(self.ret);
        self.insert_at(node, at);
    }

    pub fn insert_node_before(&mut self, node: NodeId, anchor: NodeId) {
        let at = self.position(anchor);
        self.insert_at(node, at);
    }

    pub fn insert_node_after(&mut self, node: NodeId, anchor: NodeId) {
        let at = self.position(anchor) + 1;
        self.insert_at(node, at);
    }

    /// Moves an already placed node immediately before `anchor`.
    pub fn move_node_before(&mut self, node: NodeId, anchor: NodeId) {
        if node == anchor {
            return;
        }
        self.remove_from_order(node);
        let at = self.position(anchor);
        self.insert_at(node, at);
    }

    fn insert_at(&mut self, node: NodeId, at: usize) {
        self.shift_positions_from(at, 1);
        self.order.insert(at, node);
        self.pos.insert(node, at);
    }

    fn remove_from_order(&mut self, node: NodeId) {
        let at = self
            .pos
            .remove(&node)
            .expect("node must be placed in the graph order");
        self.order.remove(at);
        self.shift_positions_from(at + 1, -1);
    }

    fn shift_positions_from(&mut self, start: usize, delta: isize) {
        for (_, position) in self.pos.iter_mut() {
            if *position >= start {
                if delta.is_positive() {
                    *position += delta.unsigned_abs();
                } else {
                    *position -= delta.unsigned_abs();
                }
            }
        }
    }

    fn position(&self, node: NodeId) -> usize {
        *self.pos.get(&node).expect("node must be placed in the graph order")
    }

    /// O(1) relative-position predicate over placed nodes.
    pub fn is_before(&self, a: NodeId, b: NodeId) -> bool {
        self.position(a) < self.position(b)
    }

    /// Iterates placed nodes in graph order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.order.iter().copied()
    }

    pub fn node_count(&self) -> usize {
        self.order.len()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes
            .get(node.0 as usize)
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Destroys a node. Every output must be use-free; clear the consumers'
    /// inputs first. The return node is never destroyed.
    pub fn destroy_node(&mut self, node: NodeId) -> Result<(), IrError> {
        debug_assert!(node != self.ret, "the return node cannot be destroyed");
        for &output in &self.node_ref(node).outputs {
            if !self.value_ref(output).uses.is_empty() {
                return Err(IrError::DestroyWithLiveUses { node });
            }
        }
        self.clear_inputs(node);
        let removed = self.nodes[node.0 as usize]
            .take()
            .expect("node must exist in the arena");
        for output in removed.outputs {
            self.values[output.0 as usize] = None;
        }
        if self.pos.contains_key(&node) {
            self.remove_from_order(node);
        }
        Ok(())
    }

    /// Drops every input edge of `node`, updating use lists.
    pub fn clear_inputs(&mut self, node: NodeId) {
        let inputs = mem::take(&mut self.node_mut(node).inputs);
        for input in inputs {
            self.value_mut(input).uses.retain(|u| u.user != node);
        }
    }

    /// Appends `value` to the node's input list.
    pub fn add_input(&mut self, node: NodeId, value: ValueId) {
        let index = self.node_ref(node).inputs.len();
        self.node_mut(node).inputs.push(value);
        self.value_mut(value).uses.push(Use { user: node, index });
    }

    /// Redirects every use of `from` to `to`.
    pub fn replace_all_uses(&mut self, from: ValueId, to: ValueId) {
        if from == to {
            return;
        }
        let uses = mem::take(&mut self.value_mut(from).uses);
        for u in &uses {
            self.node_mut(u.user).inputs[u.index] = to;
        }
        self.value_mut(to).uses.extend(uses);
    }

    pub fn op(&self, node: NodeId) -> &Op {
        &self.node_ref(node).op
    }

    pub fn inputs(&self, node: NodeId) -> &[ValueId] {
        &self.node_ref(node).inputs
    }

    pub fn outputs(&self, node: NodeId) -> &[ValueId] {
        &self.node_ref(node).outputs
    }

    pub fn input(&self, node: NodeId, index: usize) -> ValueId {
        self.node_ref(node).inputs[index]
    }

    pub fn output(&self, node: NodeId, index: usize) -> ValueId {
        self.node_ref(node).outputs[index]
    }

    pub fn producer(&self, value: ValueId) -> Option<(NodeId, usize)> {
        self.value_ref(value).producer
    }

    pub fn uses(&self, value: ValueId) -> &[Use] {
        &self.value_ref(value).uses
    }

    pub fn dims(&self, value: ValueId) -> &[i64] {
        &self.value_ref(value).dims
    }

    pub fn dtype(&self, value: ValueId) -> DType {
        self.value_ref(value).dtype
    }

    pub fn value_name(&self, value: ValueId) -> &str {
        &self.value_ref(value).name
    }

    pub fn set_unique_name(&mut self, value: ValueId, name: impl Into<String>) {
        self.value_mut(value).name = name.into();
    }

    pub fn set_value_info(&mut self, value: ValueId, dims: Vec<i64>, dtype: DType) {
        let v = self.value_mut(value);
        v.dims = dims;
        v.dtype = dtype;
    }

    /// Copies shape and element type from `src` onto `dst` (names are not
    /// metadata and stay untouched).
    pub fn copy_metadata(&mut self, dst: ValueId, src: ValueId) {
        let (dims, dtype) = {
            let v = self.value_ref(src);
            (v.dims.clone(), v.dtype)
        };
        self.set_value_info(dst, dims, dtype);
    }

    /// Replaces the graph order wholesale. The caller must supply a
    /// permutation of the currently placed nodes.
    pub(crate) fn set_order(&mut self, order: Vec<NodeId>) {
        debug_assert_eq!(order.len(), self.order.len());
        self.pos.clear();
        for (position, &node) in order.iter().enumerate() {
            self.pos.insert(node, position);
        }
        self.order = order;
    }

    /// Checks that every input is defined (by a parameter or an earlier
    /// node) before it is used. A DAG in a valid order always passes.
    pub fn verify(&self) -> Result<(), IrError> {
        let mut available: Vec<bool> = vec![false; self.values.len()];
        for &param in &self.params {
            available[param.0 as usize] = true;
        }
        for node in self.nodes() {
            for &input in &self.node_ref(node).inputs {
                if !available[input.0 as usize] {
                    return Err(IrError::UseBeforeDef { value: input, node });
                }
            }
            for &output in &self.node_ref(node).outputs {
                available[output.0 as usize] = true;
            }
        }
        Ok(())
    }

    fn node_ref(&self, node: NodeId) -> &Node {
        self.nodes[node.0 as usize]
            .as_ref()
            .expect("node must exist in the arena")
    }

    fn node_mut(&mut self, node: NodeId) -> &mut Node {
        self.nodes[node.0 as usize]
            .as_mut()
            .expect("node must exist in the arena")
    }

    fn value_ref(&self, value: ValueId) -> &Value {
        self.values[value.0 as usize]
            .as_ref()
            .expect("value must exist in the arena")
    }

    fn value_mut(&mut self, value: ValueId) -> &mut Value {
        self.values[value.0 as usize]
            .as_mut()
            .expect("value must exist in the arena")
    }
}
