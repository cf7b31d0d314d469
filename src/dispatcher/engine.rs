//! The runtime the dispatcher drives.
//!
//! The runtime keeps thread-local interpreter state, so a [`Runtime`] is
//! never `Send`: it is built on the owner thread by a factory and only ever
//! touched there. Everything the dispatcher needs from it is listed in the
//! trait below; loaders and interpreters stay behind it.

use super::handle_table::Handle;
use super::trampoline::Trampoline;
use super::value::Value;
use std::path::PathBuf;
use std::sync::Arc;

/// Opaque function reference handed out by [`Runtime::resolve_function`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FunctionRef(pub u64);

/// Failure reported by the runtime itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("runtime error {code}: {message}")]
pub struct RuntimeError {
    /// Runtime status code. Never zero.
    pub code: i32,
    pub message: String,
}

impl RuntimeError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Callback entry points passed along with an asynchronous invocation.
///
/// The runtime fires at most one of `resolve`/`reject`, passing `context`
/// back verbatim. A missing trampoline means the caller registered no
/// closure for that outcome.
#[derive(Clone, Debug)]
pub struct AsyncCallbacks {
    pub resolve: Option<Trampoline>,
    pub reject: Option<Trampoline>,
    pub context: Option<Handle>,
}

impl AsyncCallbacks {
    pub(crate) fn none() -> Self {
        Self {
            resolve: None,
            reject: None,
            context: None,
        }
    }

    /// Deliver a successful result. Returns the value produced by the host
    /// closure, or `Null` when nothing was registered.
    pub fn resolve(&self, value: Value) -> Value {
        match (&self.resolve, self.context) {
            (Some(trampoline), Some(context)) => trampoline.invoke(value, context),
            _ => Value::Null,
        }
    }

    /// Deliver a failure. Same contract as [`AsyncCallbacks::resolve`].
    pub fn reject(&self, value: Value) -> Value {
        match (&self.reject, self.context) {
            (Some(trampoline), Some(context)) => trampoline.invoke(value, context),
            _ => Value::Null,
        }
    }
}

/// C-shaped API of a thread-affine script runtime.
pub trait Runtime {
    fn initialize(&mut self) -> Result<(), RuntimeError>;

    /// Tear down the runtime. Invoked once per successful start.
    fn destroy(&mut self);

    fn load_from_file(&mut self, tag: &str, paths: &[PathBuf]) -> Result<(), RuntimeError>;

    fn load_from_memory(&mut self, tag: &str, buffer: &[u8]) -> Result<(), RuntimeError>;

    fn resolve_function(&mut self, name: &str) -> Option<FunctionRef>;

    /// `Ok(None)` means the call succeeded without producing a value.
    fn invoke(&mut self, function: FunctionRef, args: &[Value])
        -> Result<Option<Value>, RuntimeError>;

    /// Submit an asynchronous invocation. The eventual outcome arrives
    /// through `callbacks`, possibly from another thread.
    fn invoke_async(
        &mut self,
        function: FunctionRef,
        args: &[Value],
        callbacks: AsyncCallbacks,
    ) -> Result<Option<Value>, RuntimeError>;
}

/// Builds a runtime on the owner thread.
pub type RuntimeFactory = Arc<dyn Fn() -> Box<dyn Runtime> + Send + Sync>;
