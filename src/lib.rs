//! Recursive graph bisection for a neural-network compiler backend.
//!
//! The pass cuts a computation graph until every resulting subgraph's peak
//! working set fits a device's on-chip local memory:
//! - [`partition`] finds a frontier of cut points that roughly halves the
//!   estimated working set,
//! - [`surgeon`] extracts the downstream cone behind the frontier into a new
//!   graph, stitching explicit `Load`/`Store` boundary operators and a single
//!   `SubGraph` container node into the parent,
//! - [`split`] owns the produced split graphs, drives the recursion, and
//!   back-propagates proposed output tiles through [`shape`] so the outer
//!   allocator can probe ever-smaller working sets.

pub mod diag;
pub mod error;
pub mod ir;
pub mod memory;
pub mod ops;
pub mod partition;
pub mod print;
pub mod shape;
pub mod split;
pub mod surgeon;
pub mod target;

pub use diag::{DiagSink, Diagnostic};
pub use error::SplitError;
pub use ir::{Graph, NodeId, ValueId};
pub use ops::{DType, GraphId, Op};
pub use split::SplitManager;
pub use target::{EuAlignedTarget, MemSize, TargetTransformInfo};
