//! Node identity, states, callbacks, and per-node statistics.
//!
//! A node exists for the data it maintains; the data is the pure outcome of
//! the node's inputs. Change handlers and the `run` callback are the
//! operations on that data, roughly analogous to incremental view
//! maintenance over database relations.

use std::any::Any;
use std::fmt;

use crate::engine::NodeView;

/// Unique identifier for a node within one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// State of a node after the last engine iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// The node's data is not up to date with its inputs.
    Stale,
    /// The node's data is valid and was updated during the last iteration.
    Updated,
    /// The node's data is valid and did not change during the last iteration.
    Unchanged,
    /// Processing was abandoned for this node during the last iteration.
    Canceled,
}

/// Result of a node's `run` callback (full recompute).
///
/// A recompute always leaves the node's data valid, so only the two valid
/// end states are expressible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeResult {
    /// The recompute changed the node's data.
    Updated,
    /// The recompute left the node's data unchanged.
    Unchanged,
}

impl From<ComputeResult> for NodeState {
    fn from(result: ComputeResult) -> Self {
        match result {
            ComputeResult::Updated => NodeState::Updated,
            ComputeResult::Unchanged => NodeState::Unchanged,
        }
    }
}

/// Result of a per-input change handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerResult {
    /// The change cannot be absorbed incrementally; the node must fall back
    /// to a full recompute.
    Unhandled,
    /// The change was absorbed and the node's data was updated as a result.
    HandledUpdated,
    /// The change was absorbed and the node's data was left unchanged.
    HandledUnchanged,
}

/// Per-node processing counters.
///
/// Counters are monotonically non-decreasing for the lifetime of the engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeStats {
    /// Iterations in which the node's `run` callback rebuilt its data.
    pub recompute: u64,
    /// Iterations in which the node was processed through change handlers
    /// alone (including iterations where no input had changed).
    pub compute: u64,
    /// Iterations in which processing was canceled for this node.
    pub cancel: u64,
}

/// Allocates and initializes a node's data from the engine init argument.
pub type InitFn = Box<dyn FnMut(&dyn Any) -> Box<dyn Any>>;

/// Rebuilds a node's data from scratch against the current data of all its
/// inputs.
pub type RunFn = Box<dyn Fn(&NodeView<'_>, &mut dyn Any) -> ComputeResult>;

/// Releases a node's data. The data box is consumed; resources not released
/// here are dropped normally.
pub type CleanupFn = Box<dyn FnMut(Box<dyn Any>)>;

/// Reports whether a node's data may be read even though the node was not
/// refreshed in the last iteration.
pub type IsValidFn = Box<dyn Fn(&dyn Any) -> bool>;

/// Clears per-iteration tracked deltas inside a node's data.
pub type ClearTrackedFn = Box<dyn FnMut(&mut dyn Any)>;

/// Incrementally applies one input's change to the dependent's data.
///
/// A handler may read any other input of the same node through the
/// [`NodeView`]. A handler that needs the context's transaction handles and
/// finds them absent must return [`HandlerResult::Unhandled`].
pub type ChangeHandlerFn = Box<dyn Fn(&NodeView<'_>, &mut dyn Any) -> HandlerResult>;

/// Dumps diagnostic information when an input's change handler returned
/// [`HandlerResult::Unhandled`].
pub type FailureInfoFn = Box<dyn Fn(&NodeView<'_>)>;

/// Declaration-time description of a node: its name, its lifetime callbacks,
/// and its optional hooks.
///
/// `run` is mandatory; it is both the full-recompute fallback and, for nodes
/// without inputs, the change probe executed every iteration. All other
/// callbacks are optional.
pub struct NodeSpec {
    pub(crate) name: String,
    pub(crate) run: RunFn,
    pub(crate) init: Option<InitFn>,
    pub(crate) cleanup: Option<CleanupFn>,
    pub(crate) is_valid: Option<IsValidFn>,
    pub(crate) clear_tracked_data: Option<ClearTrackedFn>,
}

impl NodeSpec {
    /// Creates a node description with the given name and `run` callback.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        run: impl Fn(&NodeView<'_>, &mut dyn Any) -> ComputeResult + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            run: Box::new(run),
            init: None,
            cleanup: None,
            is_valid: None,
            clear_tracked_data: None,
        }
    }

    /// Sets the data-initialization callback. Nodes without one get unit
    /// data.
    #[must_use]
    pub fn init(mut self, init: impl FnMut(&dyn Any) -> Box<dyn Any> + 'static) -> Self {
        self.init = Some(Box::new(init));
        self
    }

    /// Sets the data-release callback, invoked once during engine cleanup.
    #[must_use]
    pub fn cleanup(mut self, cleanup: impl FnMut(Box<dyn Any>) + 'static) -> Self {
        self.cleanup = Some(Box::new(cleanup));
        self
    }

    /// Sets the validity predicate consulted by the safe data accessors when
    /// the node is not in a valid state (e.g. data that stores no references
    /// into external records stays safe to read across iterations).
    #[must_use]
    pub fn is_valid(mut self, is_valid: impl Fn(&dyn Any) -> bool + 'static) -> Self {
        self.is_valid = Some(Box::new(is_valid));
        self
    }

    /// Sets the callback that clears per-iteration tracked deltas, invoked
    /// at the start of every iteration.
    #[must_use]
    pub fn clear_tracked_data(mut self, clear: impl FnMut(&mut dyn Any) + 'static) -> Self {
        self.clear_tracked_data = Some(Box::new(clear));
        self
    }

    /// Returns the node name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSpec")
            .field("name", &self.name)
            .field("init", &self.init.is_some())
            .field("cleanup", &self.cleanup.is_some())
            .field("is_valid", &self.is_valid.is_some())
            .field("clear_tracked_data", &self.clear_tracked_data.is_some())
            .finish_non_exhaustive()
    }
}

/// Change handler that ignores the input change entirely.
///
/// Legal, but hazardous: it asserts that handling some *other* input's
/// changes always covers this input's changes (the inputs are correlated).
/// Use only with documentation of why the correlation holds; when in doubt,
/// return [`HandlerResult::Unhandled`] and pay for the recompute instead.
pub fn noop_handler(_node: &NodeView<'_>, _data: &mut dyn Any) -> HandlerResult {
    HandlerResult::HandledUnchanged
}
