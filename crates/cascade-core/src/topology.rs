//! DAG topology: the node registry, input edges, and traversal orders.
//!
//! [`EngineDag`] owns the structural half of the engine: node names, the
//! per-node input lists, cycle rejection at edge-insertion time, the Kahn
//! topological order used by the iteration driver, and reachability marking
//! for runs that drive a subset of roots.

use std::collections::VecDeque;
use std::fmt;

use fxhash::FxHashMap;
use smallvec::SmallVec;

use crate::error::EngineError;
use crate::node::NodeId;

/// Maximum number of inputs per node.
///
/// A hard limit: `add_input` refuses the edge once a node has this many
/// inputs.
pub const MAX_NODE_INPUTS: usize = 256;

/// A node's structural entry: its name and adjacency lists.
///
/// `SmallVec` keeps nodes with up to 4 inputs free of heap allocation; most
/// nodes in a control-plane DAG have few inputs.
pub(crate) struct DagNode {
    pub(crate) id: NodeId,
    pub(crate) name: String,
    /// Input nodes, in declaration order. Declaration order is evaluation
    /// order for change-handler dispatch and is stable for the engine's
    /// lifetime.
    pub(crate) inputs: SmallVec<[NodeId; 4]>,
    /// Nodes that list this node as an input.
    pub(crate) dependents: SmallVec<[NodeId; 4]>,
}

/// The dependency DAG of an engine.
///
/// Mutable only during construction; the engine builder finalizes it and
/// never exposes it mutably afterwards, so the iteration driver can rely on
/// a frozen topology and a pre-computed execution order.
pub struct EngineDag {
    nodes: Vec<DagNode>,
    name_index: FxHashMap<String, NodeId>,
    /// Topologically sorted order, inputs before dependents.
    execution_order: Vec<NodeId>,
    /// Nodes with no inputs.
    source_nodes: Vec<NodeId>,
    /// Nodes no other node depends on (the run roots).
    sink_nodes: Vec<NodeId>,
    finalized: bool,
}

impl fmt::Debug for EngineDag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineDag")
            .field("node_count", &self.nodes.len())
            .field("source_nodes", &self.source_nodes)
            .field("sink_nodes", &self.sink_nodes)
            .field("execution_order", &self.execution_order)
            .field("finalized", &self.finalized)
            .finish_non_exhaustive()
    }
}

impl EngineDag {
    /// Creates an empty DAG.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            name_index: FxHashMap::default(),
            execution_order: Vec::new(),
            source_nodes: Vec::new(),
            sink_nodes: Vec::new(),
            finalized: false,
        }
    }

    /// Adds a node with the given name.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateNode`] if the name is already taken.
    pub fn add_node(&mut self, name: impl Into<String>) -> Result<NodeId, EngineError> {
        let name = name.into();
        if self.name_index.contains_key(&name) {
            return Err(EngineError::DuplicateNode(name));
        }

        // Node count is bounded well below u32::MAX by construction-time use.
        #[allow(clippy::cast_possible_truncation)]
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(DagNode {
            id,
            name: name.clone(),
            inputs: SmallVec::new(),
            dependents: SmallVec::new(),
        });
        self.name_index.insert(name, id);
        self.finalized = false;

        Ok(id)
    }

    /// Adds `input` as a dependency of `node`.
    ///
    /// All checks run before any mutation, so a failed call leaves the DAG
    /// exactly as it was.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NodeNotFound`] if either node does not exist,
    /// [`EngineError::DuplicateInput`] if the edge already exists,
    /// [`EngineError::InputLimitExceeded`] past [`MAX_NODE_INPUTS`], and
    /// [`EngineError::CycleDetected`] if `input` already depends on `node`
    /// (directly or transitively, including `input == node`).
    pub fn add_input(&mut self, node: NodeId, input: NodeId) -> Result<(), EngineError> {
        if self.node(node).is_none() {
            return Err(EngineError::NodeNotFound(format!("{node}")));
        }
        if self.node(input).is_none() {
            return Err(EngineError::NodeNotFound(format!("{input}")));
        }

        let node_name = || self.nodes[node.0 as usize].name.clone();
        let input_name = || self.nodes[input.0 as usize].name.clone();

        if self.nodes[node.0 as usize].inputs.contains(&input) {
            return Err(EngineError::DuplicateInput {
                node: node_name(),
                input: input_name(),
            });
        }
        if self.nodes[node.0 as usize].inputs.len() >= MAX_NODE_INPUTS {
            return Err(EngineError::InputLimitExceeded {
                node: node_name(),
                max: MAX_NODE_INPUTS,
            });
        }
        // DFS from the candidate input looking for `node` keeps the graph
        // acyclic one edge at a time.
        if node == input || self.depends_on(input, node) {
            return Err(EngineError::CycleDetected {
                node: node_name(),
                input: input_name(),
            });
        }

        self.nodes[node.0 as usize].inputs.push(input);
        self.nodes[input.0 as usize].dependents.push(node);
        self.finalized = false;

        Ok(())
    }

    /// Freezes the topology: computes the execution order and classifies
    /// sources and sinks.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Empty`] if the DAG has no nodes, and
    /// [`EngineError::CycleDetected`] if a cycle slipped in (cannot happen
    /// through [`add_input`](Self::add_input), kept as a safety net).
    pub fn finalize(&mut self) -> Result<(), EngineError> {
        if self.nodes.is_empty() {
            return Err(EngineError::Empty);
        }

        let order = self.kahn_topo_sort();
        if order.len() < self.nodes.len() {
            let in_order = vec_to_marks(&order, self.nodes.len());
            for dag_node in &self.nodes {
                if !in_order[dag_node.id.0 as usize] {
                    return Err(EngineError::CycleDetected {
                        node: dag_node.name.clone(),
                        input: dag_node.name.clone(),
                    });
                }
            }
        }
        self.execution_order = order;

        self.source_nodes.clear();
        self.sink_nodes.clear();
        for dag_node in &self.nodes {
            if dag_node.inputs.is_empty() {
                self.source_nodes.push(dag_node.id);
            }
            if dag_node.dependents.is_empty() {
                self.sink_nodes.push(dag_node.id);
            }
        }

        self.finalized = true;
        Ok(())
    }

    // ---- Accessors ----

    /// Returns the number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the number of inputs of a node, or 0 for an unknown node.
    #[must_use]
    pub fn input_count(&self, node: NodeId) -> usize {
        self.node(node).map_or(0, |n| n.inputs.len())
    }

    /// Returns a node's inputs in declaration order.
    #[must_use]
    pub fn inputs(&self, node: NodeId) -> &[NodeId] {
        self.node(node).map_or(&[], |n| n.inputs.as_slice())
    }

    /// Returns the `NodeId` for a given node name.
    #[must_use]
    pub fn node_id_by_name(&self, name: &str) -> Option<NodeId> {
        self.name_index.get(name).copied()
    }

    /// Returns the node name for a given `NodeId`.
    #[must_use]
    pub fn node_name(&self, id: NodeId) -> Option<&str> {
        self.node(id).map(|n| n.name.as_str())
    }

    /// Returns all nodes with no inputs.
    #[must_use]
    pub fn sources(&self) -> &[NodeId] {
        &self.source_nodes
    }

    /// Returns all nodes no other node depends on.
    #[must_use]
    pub fn sinks(&self) -> &[NodeId] {
        &self.sink_nodes
    }

    /// Returns nodes in execution order (inputs before dependents).
    #[must_use]
    pub fn execution_order(&self) -> &[NodeId] {
        &self.execution_order
    }

    /// Returns whether the DAG has been finalized.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Marks the nodes reachable from `roots` by following input edges
    /// (each root's sub-DAG, roots included).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NodeNotFound`] if a root does not exist.
    pub fn reachable_from(&self, roots: &[NodeId]) -> Result<Vec<bool>, EngineError> {
        let mut reachable = vec![false; self.nodes.len()];
        let mut stack: Vec<NodeId> = Vec::with_capacity(roots.len());

        for &root in roots {
            if self.node(root).is_none() {
                return Err(EngineError::NodeNotFound(format!("{root}")));
            }
            stack.push(root);
        }

        while let Some(id) = stack.pop() {
            let idx = id.0 as usize;
            if reachable[idx] {
                continue;
            }
            reachable[idx] = true;
            stack.extend_from_slice(&self.nodes[idx].inputs);
        }

        Ok(reachable)
    }

    // ---- Internals ----

    fn node(&self, id: NodeId) -> Option<&DagNode> {
        self.nodes.get(id.0 as usize)
    }

    /// Returns true if `node` depends on `target` directly or transitively.
    fn depends_on(&self, node: NodeId, target: NodeId) -> bool {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            let idx = id.0 as usize;
            if seen[idx] {
                continue;
            }
            seen[idx] = true;
            stack.extend_from_slice(&self.nodes[idx].inputs);
        }
        false
    }

    /// Kahn's algorithm over input edges; dependencies come first.
    ///
    /// Ties are broken by `NodeId` so the order is deterministic across
    /// runs of the same construction sequence.
    fn kahn_topo_sort(&self) -> Vec<NodeId> {
        let mut remaining: Vec<usize> = self.nodes.iter().map(|n| n.inputs.len()).collect();

        let mut queue: VecDeque<NodeId> = VecDeque::new();
        let mut initial: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|n| n.inputs.is_empty())
            .map(|n| n.id)
            .collect();
        initial.sort_by_key(|n| n.0);
        queue.extend(initial);

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = queue.pop_front() {
            order.push(id);

            let mut ready: Vec<NodeId> = Vec::new();
            for &dependent in &self.nodes[id.0 as usize].dependents {
                let slot = &mut remaining[dependent.0 as usize];
                *slot = slot.saturating_sub(1);
                if *slot == 0 {
                    ready.push(dependent);
                }
            }
            ready.sort_by_key(|n| n.0);
            queue.extend(ready);
        }

        order
    }
}

impl Default for EngineDag {
    fn default() -> Self {
        Self::new()
    }
}

fn vec_to_marks(ids: &[NodeId], len: usize) -> Vec<bool> {
    let mut marks = vec![false; len];
    for id in ids {
        marks[id.0 as usize] = true;
    }
    marks
}
