//! Owner-thread dispatcher for embedding thread-affine script runtimes.
//!
//! See [`dispatcher`] for the moving parts; the commonly used types are
//! re-exported here.

pub mod dispatcher;

pub use dispatcher::{
    AwaitCallbacks, CallOutcome, DispatchError, Dispatcher, DispatcherConfig, DispatcherState,
    HostValue, Runtime, RuntimeError, Value,
};
