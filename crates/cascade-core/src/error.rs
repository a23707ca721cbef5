//! Error types for engine construction and lifecycle operations.

use crate::engine::EnginePhase;

/// Errors that can occur while building or driving an engine.
///
/// Handler degradation and iteration cancellation are *not* errors; they are
/// reported through node states and the engine's canceled flag.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A node with the same name already exists.
    #[error("duplicate node name: {0}")]
    DuplicateNode(String),

    /// An operation references a node that does not exist.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// The same input node was added twice to one node.
    #[error("duplicate input: {node} already depends on {input}")]
    DuplicateInput {
        /// Dependent node name.
        node: String,
        /// Input node name.
        input: String,
    },

    /// Adding the input would create a dependency cycle.
    #[error("cycle detected: {input} already depends on {node}")]
    CycleDetected {
        /// Dependent node name.
        node: String,
        /// Input node name.
        input: String,
    },

    /// A node exceeds the maximum number of inputs.
    #[error("input limit exceeded: node {node} already has {max} inputs")]
    InputLimitExceeded {
        /// Dependent node name.
        node: String,
        /// Maximum allowed inputs.
        max: usize,
    },

    /// A table node exceeds the maximum number of secondary indexes.
    #[error("index limit exceeded adding {name} (max {max})")]
    IndexLimitExceeded {
        /// Name of the index being added.
        name: String,
        /// Maximum allowed indexes.
        max: usize,
    },

    /// A secondary index with the same name already exists on the table node.
    #[error("duplicate index name: {0}")]
    DuplicateIndex(String),

    /// The engine has no nodes.
    #[error("empty engine: no nodes")]
    Empty,

    /// An operation was called in the wrong lifecycle phase.
    #[error("{op} called in {phase:?} phase")]
    Lifecycle {
        /// The operation that was attempted.
        op: &'static str,
        /// The phase the engine was in.
        phase: EnginePhase,
    },
}
