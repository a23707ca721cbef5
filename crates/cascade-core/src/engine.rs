//! The engine: lifecycle, per-iteration scheduling, and dispatch.
//!
//! [`Engine`] owns the frozen DAG plus one runtime slot per node (data,
//! last-iteration state, counters, callbacks) and drives every iteration:
//!
//! ```text
//! main loop, once per tick:
//!     engine.init_run();                     // clear tracked deltas, reset flags
//!     engine.set_context(ctx);               // txn handles for this iteration
//!     engine.run(recompute_allowed)?;        // walk the DAG, inputs first
//!     ... read inspection API, commit txns ...
//!     if engine.need_run() { /* schedule another tick */ }
//! ```
//!
//! Per node the driver consults the declared inputs in order: an unchanged
//! input is skipped, an updated input goes through its change handler, and a
//! missing or degraded handler falls back to the node's `run`. When a
//! recompute is needed but the iteration was driven with
//! `recompute_allowed = false`, the iteration cancels: the failing node and
//! its transitive dependents end [`NodeState::Canceled`] and the sticky
//! force-recompute flag is set so the change cannot be lost before the next
//! iteration.
//!
//! Everything is single-threaded and cooperative; callbacks run on the
//! calling thread and there are no suspension points.

use std::any::Any;
use std::fmt;

use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::builder::{EngineBuilder, InputBinding};
use crate::context::EngineContext;
use crate::error::EngineError;
use crate::node::{HandlerResult, NodeId, NodeSpec, NodeState, NodeStats};
use crate::topology::EngineDag;

/// Lifecycle phase of an engine.
///
/// The phases are one-way: `Uninitialized -> Initialized -> Cleaned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    /// Built, but node data has not been created yet.
    Uninitialized,
    /// Node data exists; the engine can run iterations.
    Initialized,
    /// Node data has been released; the engine is inert.
    Cleaned,
}

/// Engine-wide counters, complementing the per-node [`NodeStats`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineMetrics {
    /// Iterations driven (canceled ones included).
    pub iterations: u64,
    /// Iterations that ended canceled.
    pub canceled_iterations: u64,
    /// Iterations entered with a force-recompute request pending.
    pub forced_recomputes: u64,
}

/// Runtime slot for one node.
struct NodeSlot {
    spec: NodeSpec,
    /// Input bindings in declaration order, mirroring the DAG's input list.
    inputs: SmallVec<[InputBinding; 4]>,
    data: Option<Box<dyn Any>>,
    state: NodeState,
    stats: NodeStats,
}

/// The incremental processing engine.
///
/// Owns the node set (frozen after construction), the per-iteration context,
/// and the cross-iteration flags (force-recompute, wake request, has-run,
/// has-updated, canceled).
pub struct Engine {
    dag: EngineDag,
    slots: Vec<NodeSlot>,
    /// Copy of the DAG's execution order, kept local to the driver.
    order: Vec<NodeId>,
    phase: EnginePhase,
    context: Option<EngineContext>,
    force_recompute: bool,
    has_run: bool,
    has_updated: bool,
    canceled: bool,
    waker: Option<Box<dyn Fn()>>,
    metrics: EngineMetrics,
}

impl Engine {
    /// Creates a builder for a new engine.
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub(crate) fn from_parts(
        dag: EngineDag,
        specs: Vec<NodeSpec>,
        bindings: Vec<SmallVec<[InputBinding; 4]>>,
    ) -> Self {
        let slots = specs
            .into_iter()
            .zip(bindings)
            .map(|(spec, inputs)| NodeSlot {
                spec,
                inputs,
                data: None,
                state: NodeState::Stale,
                stats: NodeStats::default(),
            })
            .collect();
        let order = dag.execution_order().to_vec();

        Self {
            dag,
            slots,
            order,
            phase: EnginePhase::Uninitialized,
            context: None,
            force_recompute: false,
            has_run: false,
            has_updated: false,
            canceled: false,
            waker: None,
            metrics: EngineMetrics::default(),
        }
    }

    // ---- Lifecycle ----

    /// Creates the data of every node by invoking its `init` callback with
    /// `arg`. Nodes without an `init` get unit data.
    ///
    /// Must be called once, before the first iteration.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Lifecycle`] if the engine was already
    /// initialized or cleaned.
    pub fn init(&mut self, arg: &dyn Any) -> Result<(), EngineError> {
        if self.phase != EnginePhase::Uninitialized {
            return Err(EngineError::Lifecycle {
                op: "init",
                phase: self.phase,
            });
        }
        for slot in &mut self.slots {
            let data = match slot.spec.init.as_mut() {
                Some(init) => init(arg),
                None => unit_data(),
            };
            slot.data = Some(data);
        }
        self.phase = EnginePhase::Initialized;
        Ok(())
    }

    /// Prepares the engine for a new iteration: clears every node's tracked
    /// deltas and resets the per-iteration flags.
    ///
    /// Call this in the main loop before every potential [`run`](Self::run).
    pub fn init_run(&mut self) {
        self.has_run = false;
        self.has_updated = false;
        self.canceled = false;
        for slot in &mut self.slots {
            if let (Some(clear), Some(data)) =
                (slot.spec.clear_tracked_data.as_mut(), slot.data.as_mut())
            {
                clear(data.as_mut());
            }
        }
    }

    /// Drives one iteration over the whole DAG (every sink is a root).
    ///
    /// With `recompute_allowed = false` the iteration cancels as soon as any
    /// node would need a full recompute; see the module docs. With
    /// `recompute_allowed = true` the caller must have installed a context
    /// whose transaction bundle is valid, since `run` callbacks are entitled
    /// to it.
    ///
    /// The engine does not special-case the first iteration: callers should
    /// request a force recompute before it so every node's data gets built.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Lifecycle`] unless the engine is initialized.
    pub fn run(&mut self, recompute_allowed: bool) -> Result<(), EngineError> {
        let roots = self.dag.sinks().to_vec();
        self.run_from(&roots, recompute_allowed)
    }

    /// Drives one iteration limited to the sub-DAG reachable from `roots`.
    ///
    /// Nodes outside the reachable sub-DAG are not touched: no callbacks,
    /// no state transitions, no counters.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Lifecycle`] unless the engine is initialized,
    /// and [`EngineError::NodeNotFound`] for an unknown root.
    pub fn run_from(&mut self, roots: &[NodeId], recompute_allowed: bool) -> Result<(), EngineError> {
        if self.phase != EnginePhase::Initialized {
            return Err(EngineError::Lifecycle {
                op: "run",
                phase: self.phase,
            });
        }
        let reachable = self.dag.reachable_from(roots)?;

        self.has_run = false;
        self.has_updated = false;
        self.canceled = false;
        self.metrics.iterations += 1;

        let force = self.force_recompute;
        if force {
            self.metrics.forced_recomputes += 1;
            debug!("force recompute pending; every reachable node will recompute");
        }

        // A pending full recompute cannot be served at all this iteration:
        // cancel the whole reachable set up front.
        let order_len = self.order.len();

        if force && !recompute_allowed {
            warn!("recompute forced but not allowed; canceling iteration");
            for pos in 0..order_len {
                let id = self.order[pos];
                if reachable[id.0 as usize] {
                    self.mark_canceled(id);
                }
            }
            self.canceled = true;
            self.metrics.canceled_iterations += 1;
            return Ok(());
        }

        let mut visited_any = false;
        for pos in 0..order_len {
            let id = self.order[pos];
            if !reachable[id.0 as usize] {
                continue;
            }
            if self.has_canceled_input(id) {
                // Cancellation propagates transitively; the dependent is
                // abandoned without invoking any of its callbacks.
                self.mark_canceled(id);
                continue;
            }
            if self.canceled {
                // The iteration is canceled; the remaining walk only
                // propagates cancellation to dependents (above).
                continue;
            }
            self.evaluate_node(id, force, recompute_allowed);
            visited_any = true;
        }

        if self.canceled {
            self.metrics.canceled_iterations += 1;
        } else {
            self.has_run = visited_any;
            self.force_recompute = false;
        }
        Ok(())
    }

    /// Releases every node's data, invoking its `cleanup` callback.
    ///
    /// Must be called once, before the program terminates.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Lifecycle`] unless the engine is initialized.
    pub fn cleanup(&mut self) -> Result<(), EngineError> {
        if self.phase != EnginePhase::Initialized {
            return Err(EngineError::Lifecycle {
                op: "cleanup",
                phase: self.phase,
            });
        }
        for slot in &mut self.slots {
            if let Some(data) = slot.data.take() {
                if let Some(cleanup) = slot.spec.cleanup.as_mut() {
                    cleanup(data);
                }
            }
        }
        self.phase = EnginePhase::Cleaned;
        Ok(())
    }

    /// Returns the engine's lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    // ---- Context ----

    /// Installs the context for the coming iteration.
    pub fn set_context(&mut self, context: EngineContext) {
        self.context = Some(context);
    }

    /// Removes and returns the installed context.
    pub fn clear_context(&mut self) -> Option<EngineContext> {
        self.context.take()
    }

    /// Returns the installed context, if any.
    #[must_use]
    pub fn context(&self) -> Option<&EngineContext> {
        self.context.as_ref()
    }

    // ---- Force recompute & wake ----

    /// Requests a full recompute on the next iteration. Sticky: consumed by
    /// the next non-canceled iteration.
    ///
    /// Use when it is unclear whether something changed, or when a change
    /// cannot be tracked across iterations.
    pub fn set_force_recompute(&mut self) {
        debug!("force recompute requested");
        self.force_recompute = true;
    }

    /// As [`set_force_recompute`](Self::set_force_recompute), additionally
    /// invoking the registered waker so the next iteration is not delayed by
    /// the main loop's usual backoff.
    pub fn set_force_recompute_immediate(&mut self) {
        self.set_force_recompute();
        if let Some(waker) = &self.waker {
            waker();
        }
    }

    /// Clears a pending force-recompute request.
    pub fn clear_force_recompute(&mut self) {
        self.force_recompute = false;
    }

    /// Returns whether the next iteration is forced to recompute.
    #[must_use]
    pub fn force_recompute(&self) -> bool {
        self.force_recompute
    }

    /// Requests a full recompute. Public synonym of
    /// [`set_force_recompute`](Self::set_force_recompute) for external
    /// callers with no finer hook.
    pub fn trigger_recompute(&mut self) {
        self.set_force_recompute();
    }

    /// Registers the main-loop wake hook used by
    /// [`set_force_recompute_immediate`](Self::set_force_recompute_immediate).
    pub fn set_waker(&mut self, waker: impl Fn() + 'static) {
        self.waker = Some(Box::new(waker));
    }

    // ---- Inspection ----

    /// Returns whether the last iteration ran to completion and touched any
    /// node.
    #[must_use]
    pub fn has_run(&self) -> bool {
        self.has_run
    }

    /// Returns whether any node was updated during the last iteration.
    #[must_use]
    pub fn has_updated(&self) -> bool {
        self.has_updated
    }

    /// Returns whether the last iteration was canceled.
    #[must_use]
    pub fn canceled(&self) -> bool {
        self.canceled
    }

    /// Returns whether the engine needs another iteration: a force
    /// recompute is pending or the last iteration was canceled.
    #[must_use]
    pub fn need_run(&self) -> bool {
        self.force_recompute || self.canceled
    }

    /// Returns the `NodeId` for a node name.
    #[must_use]
    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.dag.node_id_by_name(name)
    }

    /// Returns a node's name.
    #[must_use]
    pub fn node_name(&self, node: NodeId) -> Option<&str> {
        self.dag.node_name(node)
    }

    /// Returns a node's last-iteration state.
    #[must_use]
    pub fn node_state(&self, node: NodeId) -> Option<NodeState> {
        self.slot(node).map(|s| s.state)
    }

    /// Returns whether a node's data was updated during the last iteration.
    #[must_use]
    pub fn node_changed(&self, node: NodeId) -> bool {
        self.node_state(node) == Some(NodeState::Updated)
    }

    /// Returns a node's processing counters.
    #[must_use]
    pub fn stats(&self, node: NodeId) -> Option<&NodeStats> {
        self.slot(node).map(|s| &s.stats)
    }

    /// Looks up `name` among `node`'s declared inputs.
    ///
    /// Returns `None` if `name` is not one of `node`'s inputs, even when a
    /// node of that name exists elsewhere in the DAG.
    #[must_use]
    pub fn get_input(&self, name: &str, node: NodeId) -> Option<NodeId> {
        let slot = self.slot(node)?;
        slot.inputs
            .iter()
            .map(|binding| binding.node)
            .find(|&input| self.slot(input).is_some_and(|s| s.spec.name == name))
    }

    /// Returns the data of `node`'s input named `name`, subject to the same
    /// validity gating as [`get_data`](Self::get_data).
    #[must_use]
    pub fn get_input_data<T: Any>(&self, name: &str, node: NodeId) -> Option<&T> {
        self.get_data(self.get_input(name, node)?)
    }

    /// Returns a node's data when it is safe to read: the node ended the
    /// last iteration valid (`Updated` or `Unchanged`), or its `is_valid`
    /// predicate vouches for the data. Otherwise `None`.
    ///
    /// The data must be mutated only by the node's own change handlers and
    /// `run`; dependents read it.
    #[must_use]
    pub fn get_data<T: Any>(&self, node: NodeId) -> Option<&T> {
        let slot = self.slot(node)?;
        let data = slot.data.as_ref()?;
        let usable = matches!(slot.state, NodeState::Updated | NodeState::Unchanged)
            || slot
                .spec
                .is_valid
                .as_ref()
                .is_some_and(|is_valid| is_valid(data.as_ref()));
        if usable {
            data.downcast_ref()
        } else {
            None
        }
    }

    /// Returns a node's data without any coherence check on the node's
    /// state. Only for callers that know the data is valid, e.g. right
    /// after [`init`](Self::init) and before the first iteration.
    #[must_use]
    pub fn get_internal_data<T: Any>(&self, node: NodeId) -> Option<&T> {
        self.slot(node)?.data.as_ref()?.downcast_ref()
    }

    /// Mutable variant of [`get_internal_data`](Self::get_internal_data),
    /// for initialization-time wiring such as attaching secondary indexes
    /// to a table node.
    #[must_use]
    pub fn get_internal_data_mut<T: Any>(&mut self, node: NodeId) -> Option<&mut T> {
        self.slots
            .get_mut(node.0 as usize)?
            .data
            .as_mut()?
            .downcast_mut()
    }

    /// Returns the engine-wide counters.
    #[must_use]
    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Returns the frozen topology.
    #[must_use]
    pub fn dag(&self) -> &EngineDag {
        &self.dag
    }

    // ---- Per-node evaluation ----

    /// Computes a node's new state for this iteration.
    fn evaluate_node(&mut self, id: NodeId, force: bool, recompute_allowed: bool) {
        let idx = id.0 as usize;

        if self.slots[idx].inputs.is_empty() {
            // A node without inputs is a change source: its `run` is the
            // change probe and executes every iteration, gated or not.
            self.recompute_node(id);
            return;
        }
        if force {
            // Treated as every handler returning Unhandled; the caller has
            // already established that recompute is allowed.
            self.recompute_node(id);
            return;
        }

        let mut verdict = NodeState::Unchanged;
        let input_count = self.slots[idx].inputs.len();
        for input_pos in 0..input_count {
            let input = self.slots[idx].inputs[input_pos].node;
            match self.slots[input.0 as usize].state {
                NodeState::Canceled => {
                    self.mark_canceled(id);
                    return;
                }
                NodeState::Unchanged => {}
                NodeState::Updated => {
                    if self.slots[idx].inputs[input_pos].handler.is_none() {
                        trace!(
                            node = %self.slots[idx].spec.name,
                            input = %self.slots[input.0 as usize].spec.name,
                            "input changed without a handler; falling back to recompute"
                        );
                        self.recompute_or_cancel(id, recompute_allowed);
                        return;
                    }
                    match self.call_handler(id, input_pos) {
                        HandlerResult::Unhandled => {
                            debug!(
                                node = %self.slots[idx].spec.name,
                                input = %self.slots[input.0 as usize].spec.name,
                                "change handler degraded; falling back to recompute"
                            );
                            self.fire_failure_info(id, input_pos);
                            self.recompute_or_cancel(id, recompute_allowed);
                            return;
                        }
                        HandlerResult::HandledUpdated => verdict = NodeState::Updated,
                        HandlerResult::HandledUnchanged => {}
                    }
                }
                NodeState::Stale => {
                    // Inputs are evaluated before dependents, so a stale
                    // input means its data was never produced; rebuild.
                    self.recompute_or_cancel(id, recompute_allowed);
                    return;
                }
            }
        }

        self.set_node_state(id, verdict);
        self.slots[idx].stats.compute += 1;
    }

    /// Full recompute, or iteration cancellation when recompute is not
    /// permitted this iteration.
    fn recompute_or_cancel(&mut self, id: NodeId, recompute_allowed: bool) {
        if recompute_allowed {
            self.recompute_node(id);
        } else {
            warn!(
                node = %self.slots[id.0 as usize].spec.name,
                "recompute needed but not allowed; canceling iteration"
            );
            self.mark_canceled(id);
            self.canceled = true;
            // The change that demanded the recompute may not be observable
            // again; force the next iteration to rebuild everything.
            self.force_recompute = true;
        }
    }

    /// Invokes the node's `run` against the current data of all its inputs.
    fn recompute_node(&mut self, id: NodeId) {
        let idx = id.0 as usize;
        let mut data = self.slots[idx].data.take().unwrap_or_else(unit_data);
        let result = {
            let engine: &Engine = &*self;
            let view = NodeView { engine, node: id };
            (engine.slots[idx].spec.run)(&view, data.as_mut())
        };
        self.slots[idx].data = Some(data);
        self.slots[idx].stats.recompute += 1;
        self.set_node_state(id, result.into());
    }

    /// Invokes one input's change handler.
    ///
    /// The node's data is moved out of its slot for the duration of the
    /// call, which lets the handler hold a shared view of the rest of the
    /// engine (and read any other input's data) alongside exclusive access
    /// to its own data.
    fn call_handler(&mut self, id: NodeId, input_pos: usize) -> HandlerResult {
        let idx = id.0 as usize;
        let mut data = self.slots[idx].data.take().unwrap_or_else(unit_data);
        let result = {
            let engine: &Engine = &*self;
            let view = NodeView { engine, node: id };
            match engine.slots[idx].inputs[input_pos].handler.as_ref() {
                Some(handler) => handler(&view, data.as_mut()),
                None => HandlerResult::Unhandled,
            }
        };
        self.slots[idx].data = Some(data);
        result
    }

    /// Fires the input's compute-failure diagnostic, if attached.
    fn fire_failure_info(&self, id: NodeId, input_pos: usize) {
        if let Some(failure_info) = self.slots[id.0 as usize].inputs[input_pos]
            .failure_info
            .as_ref()
        {
            let view = NodeView {
                engine: self,
                node: id,
            };
            failure_info(&view);
        }
    }

    fn has_canceled_input(&self, id: NodeId) -> bool {
        self.slots[id.0 as usize]
            .inputs
            .iter()
            .any(|binding| self.slots[binding.node.0 as usize].state == NodeState::Canceled)
    }

    fn mark_canceled(&mut self, id: NodeId) {
        let idx = id.0 as usize;
        trace!(node = %self.slots[idx].spec.name, "node canceled");
        self.slots[idx].state = NodeState::Canceled;
        self.slots[idx].stats.cancel += 1;
    }

    fn set_node_state(&mut self, id: NodeId, state: NodeState) {
        let idx = id.0 as usize;
        trace!(node = %self.slots[idx].spec.name, ?state, "node state");
        self.slots[idx].state = state;
        if state == NodeState::Updated {
            self.has_updated = true;
        }
    }

    fn slot(&self, id: NodeId) -> Option<&NodeSlot> {
        self.slots.get(id.0 as usize)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("node_count", &self.slots.len())
            .field("phase", &self.phase)
            .field("force_recompute", &self.force_recompute)
            .field("has_run", &self.has_run)
            .field("has_updated", &self.has_updated)
            .field("canceled", &self.canceled)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

/// Borrowed view of the engine handed to a node's callbacks.
///
/// Grants read access to the iteration context and to the node's inputs
/// while the callback holds exclusive access to the node's own data.
pub struct NodeView<'e> {
    engine: &'e Engine,
    node: NodeId,
}

impl<'e> NodeView<'e> {
    /// Returns the node's id.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.node
    }

    /// Returns the node's name.
    #[must_use]
    pub fn name(&self) -> &'e str {
        self.engine.slots[self.node.0 as usize].spec.name.as_str()
    }

    /// Returns the iteration context, if one is installed.
    #[must_use]
    pub fn context(&self) -> Option<&'e EngineContext> {
        self.engine.context()
    }

    /// Returns the context's transaction bundle.
    ///
    /// `None` means this iteration must not write; a change handler in that
    /// position must return [`HandlerResult::Unhandled`].
    #[must_use]
    pub fn txn<T: Any>(&self) -> Option<&'e T> {
        self.context().and_then(|context| context.txn::<T>())
    }

    /// Looks up `name` among this node's declared inputs.
    #[must_use]
    pub fn input(&self, name: &str) -> Option<NodeId> {
        self.engine.get_input(name, self.node)
    }

    /// Returns the data of the input named `name`, subject to validity
    /// gating. Handlers treat input data as read-only.
    #[must_use]
    pub fn input_data<T: Any>(&self, name: &str) -> Option<&'e T> {
        self.engine.get_input_data(name, self.node)
    }

    /// Returns whether the input named `name` was updated this iteration.
    #[must_use]
    pub fn input_changed(&self, name: &str) -> bool {
        self.input(name)
            .is_some_and(|input| self.engine.node_changed(input))
    }
}

impl fmt::Debug for NodeView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeView")
            .field("node", &self.node)
            .field("name", &self.name())
            .finish()
    }
}

/// Placeholder data for nodes without an `init` callback.
fn unit_data() -> Box<dyn Any> {
    Box::new(())
}
