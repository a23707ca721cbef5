//! Engine builder: construction-time wiring of nodes and inputs.
//!
//! [`EngineBuilder`] collects node declarations ([`NodeSpec`]) and input
//! bindings, validating each mutation immediately so a failed call never
//! leaves a partially wired DAG. `build()` finalizes the topology and
//! produces a frozen [`Engine`]; edges cannot be added afterwards.

use smallvec::SmallVec;

use crate::engine::Engine;
use crate::error::EngineError;
use crate::node::{ChangeHandlerFn, FailureInfoFn, NodeId, NodeSpec};
use crate::topology::EngineDag;

/// One input edge of a node, with its attached callbacks.
pub(crate) struct InputBinding {
    /// The input node.
    pub(crate) node: NodeId,
    /// Change handler for the input; `None` means any change of this input
    /// forces a full recompute of the dependent.
    pub(crate) handler: Option<ChangeHandlerFn>,
    /// Diagnostic callback fired when the handler returns `Unhandled`.
    pub(crate) failure_info: Option<FailureInfoFn>,
}

/// Builder for an [`Engine`].
///
/// # Example
///
/// ```rust,ignore
/// let mut builder = Engine::builder();
/// let ports = builder.add_node(table_source("ports", fetch_ports))?;
/// let flows = builder.add_node(flows_spec())?;
/// builder.add_input(flows, ports, Some(Box::new(flows_handle_ports)))?;
/// let mut engine = builder.build()?;
/// ```
pub struct EngineBuilder {
    dag: EngineDag,
    specs: Vec<NodeSpec>,
    bindings: Vec<SmallVec<[InputBinding; 4]>>,
}

impl EngineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dag: EngineDag::new(),
            specs: Vec::new(),
            bindings: Vec::new(),
        }
    }

    /// Registers a node. Its initial state is stale and it has no inputs.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateNode`] if the name is already taken.
    pub fn add_node(&mut self, spec: NodeSpec) -> Result<NodeId, EngineError> {
        let id = self.dag.add_node(spec.name.clone())?;
        self.specs.push(spec);
        self.bindings.push(SmallVec::new());
        Ok(id)
    }

    /// Attaches `input` as a dependency of `node`, with an optional change
    /// handler.
    ///
    /// Without a handler the engine cannot process this input's changes
    /// incrementally and falls back to the node's `run` whenever the input
    /// reports an update.
    ///
    /// # Errors
    ///
    /// Propagates the topology errors of [`EngineDag::add_input`]: unknown
    /// node, duplicate input, input limit, cycle.
    pub fn add_input(
        &mut self,
        node: NodeId,
        input: NodeId,
        handler: Option<ChangeHandlerFn>,
    ) -> Result<(), EngineError> {
        self.bind_input(node, input, handler, None)
    }

    /// As [`add_input`](Self::add_input), additionally attaching a
    /// diagnostic callback fired when the change handler returns
    /// `Unhandled` (i.e. the change could not be absorbed incrementally).
    ///
    /// # Errors
    ///
    /// Propagates the topology errors of [`EngineDag::add_input`].
    pub fn add_input_with_failure_info(
        &mut self,
        node: NodeId,
        input: NodeId,
        handler: ChangeHandlerFn,
        failure_info: FailureInfoFn,
    ) -> Result<(), EngineError> {
        self.bind_input(node, input, Some(handler), Some(failure_info))
    }

    /// Finalizes the DAG and produces the engine.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Empty`] if no nodes were added.
    pub fn build(mut self) -> Result<Engine, EngineError> {
        self.dag.finalize()?;
        Ok(Engine::from_parts(self.dag, self.specs, self.bindings))
    }

    fn bind_input(
        &mut self,
        node: NodeId,
        input: NodeId,
        handler: Option<ChangeHandlerFn>,
        failure_info: Option<FailureInfoFn>,
    ) -> Result<(), EngineError> {
        self.dag.add_input(node, input)?;
        self.bindings[node.0 as usize].push(InputBinding {
            node: input,
            handler,
            failure_info,
        });
        Ok(())
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
