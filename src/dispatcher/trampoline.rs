//! Entry point the runtime calls to deliver asynchronous results.
//!
//! The runtime may fire a trampoline from any thread, at any time after the
//! submitting call returned. The registry takes the handle out of the
//! table first, so a given handle's closure runs at most once; the closure
//! itself runs with no lock held.

use super::conversion::Marshaler;
use super::error::DispatchError;
use super::handle_table::{AwaitCallbacks, Handle, HandleTable, Outcome};
use super::queue::{FinishOnDrop, Inflight};
use super::value::Value;
use std::fmt;
use std::sync::Arc;

/// Handle table plus the bookkeeping that keeps shutdown waiting for every
/// registered callback.
pub(crate) struct CallbackRegistry {
    table: HandleTable,
    inflight: Arc<Inflight>,
    marshaler: Marshaler,
}

impl CallbackRegistry {
    pub(crate) fn new(inflight: Arc<Inflight>, marshaler: Marshaler) -> Self {
        Self {
            table: HandleTable::new(),
            inflight,
            marshaler,
        }
    }

    pub(crate) fn register(&self, callbacks: AwaitCallbacks) -> Handle {
        self.inflight.begin();
        self.table.insert(callbacks)
    }

    /// Take back a registration the runtime never accepted.
    pub(crate) fn withdraw(&self, handle: Handle) {
        if self.table.take(handle).is_some() {
            self.inflight.finish();
        }
    }

    pub(crate) fn live_handles(&self) -> usize {
        self.table.len()
    }

    pub(crate) fn deliver(&self, outcome: Outcome, handle: Handle, value: Value) -> Value {
        let Some(callbacks) = self.table.take(handle) else {
            tracing::warn!(?outcome, "{}; ignoring", DispatchError::HandleNotFound(handle));
            return Value::Null;
        };
        let _done = FinishOnDrop(&self.inflight);

        tracing::debug!(%handle, ?outcome, "firing async callback");
        let result = callbacks.fire(outcome, self.marshaler.to_host(value));
        self.marshaler.to_runtime(result)
    }
}

/// Callback the runtime invokes with an async result and the context token
/// it was given at submission.
#[derive(Clone)]
pub struct Trampoline {
    registry: Arc<CallbackRegistry>,
    outcome: Outcome,
}

impl Trampoline {
    pub(crate) fn new(registry: Arc<CallbackRegistry>, outcome: Outcome) -> Self {
        Self { registry, outcome }
    }

    /// Fire the host closure registered under `context`.
    ///
    /// Returns the closure's result converted for the runtime, or `Null` if
    /// the token is unknown or was already used.
    pub fn invoke(&self, value: Value, context: Handle) -> Value {
        self.registry.deliver(self.outcome, context, value)
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }
}

impl fmt::Debug for Trampoline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trampoline")
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}
