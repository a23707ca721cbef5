//! Per-iteration engine context.
//!
//! The context carries the transaction handles change handlers and `run`
//! callbacks need when they write to external databases, plus an opaque
//! client payload. It is a snapshot installed by the main loop before each
//! iteration; the engine itself never creates or commits transactions.
//!
//! The transaction bundle is deliberately optional: an iteration driven with
//! recompute disallowed installs a context without one, and the typed
//! accessor forces callers through an `Option`, so "must not proceed" is a
//! structural check rather than a convention. A handler that needs the
//! bundle and finds `None` must return
//! [`HandlerResult::Unhandled`](crate::HandlerResult::Unhandled).
//!
//! The context must not be abused to smuggle data dependencies past the
//! DAG; anything that participates in producing a node's output belongs in
//! that node's inputs.

use std::any::Any;
use std::fmt;

/// Per-iteration bundle of external transaction handles and client payload.
///
/// Both payloads are type-erased; the program that owns the engine knows the
/// concrete types and recovers them with the typed accessors.
#[derive(Default)]
pub struct EngineContext {
    txn: Option<Box<dyn Any>>,
    client: Option<Box<dyn Any>>,
}

impl EngineContext {
    /// Creates a context without transaction handles (a no-recompute
    /// iteration).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context carrying the given transaction bundle.
    #[must_use]
    pub fn with_txn<T: Any>(txn: T) -> Self {
        Self {
            txn: Some(Box::new(txn)),
            client: None,
        }
    }

    /// Attaches an opaque client payload.
    #[must_use]
    pub fn with_client<C: Any>(mut self, client: C) -> Self {
        self.client = Some(Box::new(client));
        self
    }

    /// Returns the transaction bundle, or `None` when this iteration must
    /// not write (or `T` is not the installed type).
    #[must_use]
    pub fn txn<T: Any>(&self) -> Option<&T> {
        self.txn.as_ref()?.downcast_ref()
    }

    /// Returns whether a transaction bundle is installed.
    #[must_use]
    pub fn has_txn(&self) -> bool {
        self.txn.is_some()
    }

    /// Returns the client payload, if one of type `C` is installed.
    #[must_use]
    pub fn client<C: Any>(&self) -> Option<&C> {
        self.client.as_ref()?.downcast_ref()
    }
}

impl fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineContext")
            .field("has_txn", &self.txn.is_some())
            .field("has_client", &self.client.is_some())
            .finish_non_exhaustive()
    }
}
