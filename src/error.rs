use thiserror::Error;

use crate::ir::{IrError, NodeId};

/// Errors raised while partitioning a graph.
///
/// `UnsupportedOperator` is fatal: the pass cannot tile a node it has no
/// back-propagation rule for. The structural variants replace assertions in
/// earlier incarnations of this pass; they indicate a malformed graph rather
/// than an unsplittable one.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SplitError {
    #[error("unsupported operator `{kind}` for tile back-propagation")]
    UnsupportedOperator { kind: &'static str },
    #[error("load node {node:?} has no user to classify")]
    UnpairedLoad { node: NodeId },
    #[error("{kind} node {node:?} has no producer to classify")]
    UnanchoredBoundary { node: NodeId, kind: &'static str },
    #[error("a use of split point {node:?} lands outside both partition groups")]
    CrossingOutsideGroups { node: NodeId },
    #[error("no split state recorded for node {node:?}")]
    MissingSplitState { node: NodeId },
    #[error(transparent)]
    Ir(#[from] IrError),
}
