//! Owner-thread dispatch for thread-affine, non-reentrant script runtimes.
//!
//! A [`Dispatcher`] owns one runtime on a dedicated OS thread. Any number of
//! caller threads submit loads and calls; each submission is queued in order,
//! executed on the owner thread, and answered through a private completion
//! channel. Values cross the boundary through the [`Marshaler`], and host
//! closures for asynchronous calls are represented on the runtime side by
//! [`Handle`] tokens that the runtime echoes back through a [`Trampoline`].

pub mod config;
pub mod conversion;
pub mod engine;
pub mod error;
pub mod handle;
pub mod handle_table;
pub mod host_value;
pub mod queue;
mod runner;
pub mod trampoline;
pub mod value;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ConfigError, DispatcherConfig};
pub use conversion::{Marshaler, MAX_VALUE_DEPTH};
pub use engine::{AsyncCallbacks, FunctionRef, Runtime, RuntimeError, RuntimeFactory};
pub use error::{DispatchError, LoadSource, MarshalError};
pub use handle::{Dispatcher, DispatcherState};
pub use handle_table::{AwaitCallbacks, CallContext, Handle, Outcome};
pub use host_value::HostValue;
pub use queue::{CallOutcome, InflightStats};
pub use trampoline::Trampoline;
pub use value::{Value, ValueKind};
