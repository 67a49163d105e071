//! Target description consumed by the partitioner.
//!
//! The pass itself never computes byte sizes; it asks the target how much
//! memory an operator needs under original or tile-resized shapes. Alignment
//! is reported per value and is typically tied to the device's execution-unit
//! count.

use serde::{Deserialize, Serialize};

use crate::ir::{Graph, NodeId};
use crate::ops::DType;

/// Alignment/size pair reported for a value or an operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemSize {
    pub align: u64,
    pub size: u64,
}

impl MemSize {
    /// Accumulates another measurement: sizes add, alignments max.
    pub fn accumulate(self, other: MemSize) -> MemSize {
        MemSize {
            align: self.align.max(other.align),
            size: self.size + other.size,
        }
    }
}

/// Memory-cost oracle for one device target.
///
/// Implementations must be pure: the partitioner calls these hooks many
/// times while probing tile sizes and relies on stable answers.
pub trait TargetTransformInfo {
    /// Bytes occupied by one element of `dtype`.
    fn element_size(&self, dtype: DType) -> u64 {
        dtype.size_in_bytes()
    }

    fn global_mem_size(&self) -> u64;

    fn local_mem_size(&self) -> u64;

    /// Memory required to materialize input `index` of `node` under `dims`.
    fn operator_input_mem_usage(
        &self,
        graph: &Graph,
        node: NodeId,
        index: usize,
        dims: &[i64],
    ) -> MemSize;

    /// Memory required to materialize output `index` of `node` under `dims`.
    fn operator_output_mem_usage(
        &self,
        graph: &Graph,
        node: NodeId,
        index: usize,
        dims: &[i64],
    ) -> MemSize;

    /// Working set of `node` under its original value shapes.
    fn operator_mem_usage(&self, graph: &Graph, node: NodeId) -> MemSize {
        let mut total = MemSize::default();
        for (index, &input) in graph.inputs(node).iter().enumerate() {
            let dims = graph.dims(input).to_vec();
            total = total.accumulate(self.operator_input_mem_usage(graph, node, index, &dims));
        }
        for (index, &output) in graph.outputs(node).iter().enumerate() {
            let dims = graph.dims(output).to_vec();
            total = total.accumulate(self.operator_output_mem_usage(graph, node, index, &dims));
        }
        total
    }

    /// Working set of `node` under tile-resized shapes.
    fn operator_mem_usage_resized(
        &self,
        graph: &Graph,
        node: NodeId,
        input_dims: &[Vec<i64>],
        output_dims: &[Vec<i64>],
    ) -> MemSize {
        let mut total = MemSize::default();
        for (index, dims) in input_dims.iter().enumerate() {
            total = total.accumulate(self.operator_input_mem_usage(graph, node, index, dims));
        }
        for (index, dims) in output_dims.iter().enumerate() {
            total = total.accumulate(self.operator_output_mem_usage(graph, node, index, dims));
        }
        total
    }
}

/// Reference target: every value is aligned to the execution-unit count and
/// sized as `element size x product(dims)`.
#[derive(Debug, Clone)]
pub struct EuAlignedTarget {
    pub eu_count: u64,
    pub local_mem: u64,
    pub global_mem: u64,
}

impl Default for EuAlignedTarget {
    fn default() -> Self {
        EuAlignedTarget {
            eu_count: 32,
            local_mem: 64 * 1024,
            global_mem: 1024 * 1024 * 1024,
        }
    }
}

impl EuAlignedTarget {
    fn value_mem_usage(&self, dtype: DType, dims: &[i64]) -> MemSize {
        let mut size = self.element_size(dtype);
        for &dim in dims {
            size *= dim.max(0) as u64;
        }
        MemSize {
            align: self.eu_count,
            size,
        }
    }
}

impl TargetTransformInfo for EuAlignedTarget {
    fn global_mem_size(&self) -> u64 {
        self.global_mem
    }

    fn local_mem_size(&self) -> u64 {
        self.local_mem
    }

    fn operator_input_mem_usage(
        &self,
        graph: &Graph,
        node: NodeId,
        index: usize,
        dims: &[i64],
    ) -> MemSize {
        let dtype = graph.dtype(graph.input(node, index));
        self.value_mem_usage(dtype, dims)
    }

    fn operator_output_mem_usage(
        &self,
        graph: &Graph,
        node: NodeId,
        index: usize,
        dims: &[i64],
    ) -> MemSize {
        let dtype = graph.dtype(graph.output(node, index));
        self.value_mem_usage(dtype, dims)
    }
}
