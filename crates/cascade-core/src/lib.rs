//! # Cascade Core
//!
//! An incremental processing engine: a framework for recomputing a set of
//! derived outputs whenever external inputs change, incrementally where a
//! change handler can absorb the change and by full recompute where not.
//! It is the coordination core of control-plane programs that must, on
//! every main-loop iteration, translate changes in external databases into
//! changes in computed artifacts (e.g. forwarding rules).
//!
//! The engine is composed of nodes. Each node maintains its own data,
//! persistent across iterations, and declares zero or more inputs, forming
//! a DAG. Nodes without inputs hold the pure inputs (they probe an external
//! change log), nodes without dependents hold the final outputs, and nodes
//! in between hold intermediate results. For each input the author may
//! supply a change handler that folds that input's change into the node's
//! data; where no handler exists (or a handler degrades), the node's `run`
//! rebuilds the data from scratch. The finer the handler coverage, the more
//! incremental the processing; correctness never depends on it.
//!
//! ## Design principles
//!
//! 1. **Data-centric nodes** - a node exists for the data it maintains;
//!    handlers and `run` are operations on that data.
//! 2. **No hidden dependencies** - everything that participates in a node's
//!    output comes from its declared inputs; handlers read other inputs
//!    through the engine, never through globals.
//! 3. **Changes are never lost** - a canceled iteration pins the sticky
//!    force-recompute flag so the next iteration rebuilds from ground
//!    truth.
//! 4. **Frozen topology** - the DAG is validated and ordered at build time;
//!    the driver walks a pre-computed topological order.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cascade_core::{ComputeResult, Engine, EngineContext, NodeSpec};
//!
//! let mut builder = Engine::builder();
//! let ports = builder.add_node(table_source("ports", fetch_ports))?;
//! let flows = builder.add_node(flows_spec())?;
//! builder.add_input(flows, ports, Some(Box::new(flows_handle_ports)))?;
//!
//! let mut engine = builder.build()?;
//! engine.init(&databases)?;
//! engine.set_force_recompute();          // first iteration builds everything
//!
//! loop {
//!     engine.init_run();
//!     engine.set_context(EngineContext::with_txn(open_txns()));
//!     engine.run(true)?;
//!     if engine.node_changed(flows) { /* push new flows */ }
//!     if !engine.need_run() { /* wait for the next change */ }
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod builder;
pub mod context;
pub mod engine;
pub mod error;
pub mod node;
pub mod table;
pub mod topology;


pub use builder::EngineBuilder;
pub use context::EngineContext;
pub use engine::{Engine, EngineMetrics, EnginePhase, NodeView};
pub use error::EngineError;
pub use node::{
    noop_handler, ChangeHandlerFn, ComputeResult, FailureInfoFn, HandlerResult, NodeId, NodeSpec,
    NodeState, NodeStats,
};
pub use table::{table_source, TableData, TrackedTable, MAX_TABLE_INDEXES};
pub use topology::{EngineDag, MAX_NODE_INPUTS};

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
