//! External-table node support.
//!
//! Nodes whose data is a view over an external database table share a common
//! shape: the node data owns a handle to the table plus any secondary
//! indexes attached to it, and the node's `run` reports an update exactly
//! when the table's change log recorded something since the last iteration.
//! This module provides that shape so programs declare such nodes in one
//! line instead of hand-writing the callbacks per table.

use std::any::Any;
use std::fmt;

use tracing::debug;

use crate::engine::NodeView;
use crate::error::EngineError;
use crate::node::{ComputeResult, NodeSpec};

/// Maximum number of secondary indexes per table node.
///
/// A hard limit: `add_index` refuses further indexes once reached.
pub const MAX_TABLE_INDEXES: usize = 256;

/// A table handle whose external client tracks row-level changes between
/// iterations.
pub trait TrackedTable: Any {
    /// Returns whether the change log recorded any change since the last
    /// iteration.
    fn has_tracked_changes(&self) -> bool;

    /// Human-readable dump of the tracked changes, used by diagnostics.
    /// The default reports nothing.
    fn tracked_change_summary(&self) -> String {
        String::new()
    }
}

struct NamedIndex {
    name: String,
    index: Box<dyn Any>,
}

/// Node data for a table-backed node: the table handle plus named secondary
/// indexes.
///
/// Indexes are attached after engine init and before the first iteration,
/// through [`Engine::get_internal_data_mut`](crate::Engine::get_internal_data_mut).
pub struct TableData<T> {
    table: T,
    indexes: Vec<NamedIndex>,
}

impl<T: Any> TableData<T> {
    /// Wraps a table handle with no indexes.
    #[must_use]
    pub fn new(table: T) -> Self {
        Self {
            table,
            indexes: Vec::new(),
        }
    }

    /// Returns the table handle.
    #[must_use]
    pub fn table(&self) -> &T {
        &self.table
    }

    /// Attaches a named secondary index.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateIndex`] if the name is taken and
    /// [`EngineError::IndexLimitExceeded`] past [`MAX_TABLE_INDEXES`].
    pub fn add_index<I: Any>(
        &mut self,
        name: impl Into<String>,
        index: I,
    ) -> Result<(), EngineError> {
        let name = name.into();
        if self.indexes.iter().any(|entry| entry.name == name) {
            return Err(EngineError::DuplicateIndex(name));
        }
        if self.indexes.len() >= MAX_TABLE_INDEXES {
            return Err(EngineError::IndexLimitExceeded {
                name,
                max: MAX_TABLE_INDEXES,
            });
        }
        self.indexes.push(NamedIndex {
            name,
            index: Box::new(index),
        });
        Ok(())
    }

    /// Returns the index registered under `name`, if it exists and has type
    /// `I`.
    #[must_use]
    pub fn index<I: Any>(&self, name: &str) -> Option<&I> {
        self.indexes
            .iter()
            .find(|entry| entry.name == name)?
            .index
            .downcast_ref()
    }

    /// Returns the number of attached indexes.
    #[must_use]
    pub fn index_count(&self) -> usize {
        self.indexes.len()
    }
}

impl<T> fmt::Debug for TableData<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableData")
            .field("index_count", &self.indexes.len())
            .finish_non_exhaustive()
    }
}

/// Declares a source node over a tracked table.
///
/// `fetch` recovers the table handle from the engine init argument; the
/// node's data becomes a [`TableData`] around it, and its `run` reports
/// [`ComputeResult::Updated`] exactly when the table has tracked changes.
pub fn table_source<T, F>(name: &str, mut fetch: F) -> NodeSpec
where
    T: TrackedTable,
    F: FnMut(&dyn Any) -> T + 'static,
{
    NodeSpec::new(name, |_node: &NodeView<'_>, data: &mut dyn Any| {
        match data.downcast_ref::<TableData<T>>() {
            Some(table_data) if table_data.table().has_tracked_changes() => ComputeResult::Updated,
            _ => ComputeResult::Unchanged,
        }
    })
    .init(move |arg| Box::new(TableData::new(fetch(arg))))
}

/// Compute-failure diagnostic for a table input: logs the input table's
/// tracked changes when debug logging is enabled.
///
/// Intended as the body of a failure-info callback attached alongside a
/// change handler on a table input.
pub fn log_tracked_changes<T: TrackedTable>(node: &NodeView<'_>, input: &str) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }
    let Some(table_data) = node.input_data::<TableData<T>>(input) else {
        return;
    };
    debug!(
        node = %node.name(),
        input = %input,
        changes = %table_data.table().tracked_change_summary(),
        "input change was not absorbed incrementally"
    );
}
