//! Declarative operator layer: element types, per-operator attribute specs,
//! and the `Op` enum the partitioner dispatches on.
//!
//! Only the attributes the tiling calculus reads are modeled; operators are
//! placeholders for compute the surrounding compiler owns.

use serde::{Deserialize, Serialize};

/// Scalar element types supported by the partitioner's size accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    Bool,
    I8,
    U8,
    I16,
    U16,
    F16,
    I32,
    U32,
    F32,
}

impl DType {
    /// Storage size of one element in bytes.
    pub fn size_in_bytes(self) -> u64 {
        match self {
            DType::Bool | DType::I8 | DType::U8 => 1,
            DType::I16 | DType::U16 | DType::F16 => 2,
            DType::I32 | DType::U32 | DType::F32 => 4,
        }
    }
}

/// Identifies a nested graph owned by the split manager's graph arena.
///
/// A `SubGraph` container node refers to the graph it wraps through this
/// handle rather than owning it inline, so the manager stays the single
/// owner of every graph it may still need to bisect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphId(pub u32);

/// Windowed-geometry attributes shared by convolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvSpec {
    pub kernel_shape: Vec<i64>,
    pub strides: Vec<i64>,
    pub pads_begin: Vec<i64>,
    pub pads_end: Vec<i64>,
}

/// Windowed-geometry attributes shared by the pooling operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSpec {
    pub kernel_shape: Vec<i64>,
    pub strides: Vec<i64>,
    pub pads_begin: Vec<i64>,
    pub pads_end: Vec<i64>,
}

/// Attribute payload for `gemm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GemmSpec {
    pub trans_a: bool,
    pub trans_b: bool,
}

/// Attribute payload for `lrn`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LrnSpec {
    pub size: i64,
    pub alpha: f32,
    pub beta: f32,
    pub bias: f32,
}

/// Attribute payload for `concat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcatSpec {
    pub axis: usize,
}

/// Permutation payload for `transpose`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransposeSpec {
    pub perm: Vec<usize>,
}

/// Payload of the `SubGraph` container node produced by extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubGraphSpec {
    pub graph: GraphId,
}

/// Operators known to the partitioner.
///
/// `Load`, `Store`, and `SubGraph` are produced by the pass itself; `Return`
/// is the distinguished terminator every graph carries. The remainder mirror
/// the operator inventory of the imported models this backend consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    Conv(ConvSpec),
    MaxPool(PoolSpec),
    AveragePool(PoolSpec),
    Gemm(GemmSpec),
    Reshape,
    Relu,
    Softmax,
    Lrn(LrnSpec),
    Add,
    Mul,
    Concat(ConcatSpec),
    Transpose(TransposeSpec),
    Load,
    Store,
    SubGraph(SubGraphSpec),
    Return,
}

impl Op {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Op::Conv(_) => "conv",
            Op::MaxPool(_) => "max_pool",
            Op::AveragePool(_) => "average_pool",
            Op::Gemm(_) => "gemm",
            Op::Reshape => "reshape",
            Op::Relu => "relu",
            Op::Softmax => "softmax",
            Op::Lrn(_) => "lrn",
            Op::Add => "add",
            Op::Mul => "mul",
            Op::Concat(_) => "concat",
            Op::Transpose(_) => "transpose",
            Op::Load => "load",
            Op::Store => "store",
            Op::SubGraph(_) => "subgraph",
            Op::Return => "return",
        }
    }

    /// Whether every output tile equals the input tile. These operators use
    /// the identity back-propagation rule.
    pub fn preserves_shape(&self) -> bool {
        matches!(
            self,
            Op::Relu | Op::Softmax | Op::Lrn(_) | Op::Add | Op::Mul | Op::Return
        )
    }

    /// Whether this is an explicit memory-transfer operator.
    pub fn is_boundary(&self) -> bool {
        matches!(self, Op::Load | Op::Store)
    }

    /// Boundary and container nodes are not counted independently when
    /// accumulating working-set sizes: their bytes are attributed to the
    /// producer or consumer whose tile already accounts for them.
    pub fn skip_mem_accounting(&self) -> bool {
        matches!(self, Op::Load | Op::Store | Op::SubGraph(_))
    }
}
