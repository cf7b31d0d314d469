//! Owner thread hosting the runtime.
//!
//! The runtime lives on a dedicated OS thread driven by a single-threaded
//! Tokio runtime. Work arrives through the shared [`WorkQueue`] and is
//! executed strictly one item at a time, in submission order. When the queue
//! is closed and drained the thread waits for outstanding async callbacks,
//! destroys the runtime and exits.

use super::config::DispatcherConfig;
use super::conversion::Marshaler;
use super::engine::{AsyncCallbacks, FunctionRef, Runtime, RuntimeError, RuntimeFactory};
use super::error::{DispatchError, LoadSource};
use super::handle_table::{AwaitCallbacks, Outcome};
use super::host_value::HostValue;
use super::queue::{CallOutcome, Completion, Inflight, InflightStats, WorkItem, WorkQueue};
use super::trampoline::{CallbackRegistry, Trampoline};
use super::value::Value;
use once_cell::sync::OnceCell;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::mpsc::{Receiver as StdReceiver, Sender as StdSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

type InitSignalChannel = (
    StdSender<Result<(), DispatchError>>,
    StdReceiver<Result<(), DispatchError>>,
);

/// State shared between the callers of one started dispatcher and its
/// owner thread.
pub(crate) struct Shared {
    pub(crate) queue: WorkQueue<WorkItem>,
    pub(crate) inflight: Arc<Inflight>,
    pub(crate) callbacks: Arc<CallbackRegistry>,
    marshaler: Marshaler,
    owner: OnceCell<ThreadId>,
}

impl Shared {
    pub(crate) fn new(marshaler: Marshaler) -> Self {
        let inflight = Arc::new(Inflight::new());
        Self {
            queue: WorkQueue::new(),
            callbacks: Arc::new(CallbackRegistry::new(inflight.clone(), marshaler)),
            inflight,
            marshaler,
            owner: OnceCell::new(),
        }
    }

    /// True when called from this session's owner thread.
    pub(crate) fn is_owner_thread(&self) -> bool {
        self.owner.get() == Some(&thread::current().id())
    }

    pub(crate) fn stats(&self) -> InflightStats {
        InflightStats {
            pending: self.inflight.pending(),
            submitted: self.inflight.submitted(),
            completed: self.inflight.completed(),
            queued: self.queue.len(),
            live_handles: self.callbacks.live_handles(),
        }
    }
}

/// Spawn the owner thread and block until the runtime has initialized.
pub(crate) fn spawn_owner_thread(
    config: &DispatcherConfig,
    factory: RuntimeFactory,
    shared: Arc<Shared>,
) -> Result<JoinHandle<()>, DispatchError> {
    let (init_tx, init_rx): InitSignalChannel = std::sync::mpsc::channel();
    let drain_timeout = config.drain_timeout;

    let thread = thread::Builder::new()
        .name(config.thread_name.clone())
        .spawn(move || {
            let tokio_rt = match tokio::runtime::Builder::new_current_thread().build() {
                Ok(rt) => rt,
                Err(err) => {
                    let _ = init_tx.send(Err(DispatchError::Spawn(err)));
                    return;
                }
            };

            let _close_on_exit = CloseOnExit(shared.clone());
            let mut core = match OwnerCore::new(&factory, shared, drain_timeout) {
                Ok(core) => {
                    let _ = init_tx.send(Ok(()));
                    core
                }
                Err(err) => {
                    let _ = init_tx.send(Err(err));
                    return;
                }
            };

            tokio_rt.block_on(core.run());
            core.shutdown();
        })?;

    match init_rx.recv() {
        Ok(Ok(())) => Ok(thread),
        Ok(Err(err)) => {
            let _ = thread.join();
            Err(err)
        }
        Err(_) => {
            let _ = thread.join();
            Err(DispatchError::Disconnected)
        }
    }
}

struct OwnerCore {
    runtime: Box<dyn Runtime>,
    shared: Arc<Shared>,
    marshaler: Marshaler,
    drain_timeout: Option<Duration>,
}

impl OwnerCore {
    fn new(
        factory: &RuntimeFactory,
        shared: Arc<Shared>,
        drain_timeout: Option<Duration>,
    ) -> Result<Self, DispatchError> {
        let _ = shared.owner.set(thread::current().id());

        let mut runtime = factory();
        runtime
            .initialize()
            .map_err(|err| DispatchError::InitializationFailure {
                code: err.code,
                message: err.message,
            })?;

        Ok(Self {
            runtime,
            marshaler: shared.marshaler,
            shared,
            drain_timeout,
        })
    }

    async fn run(&mut self) {
        while let Some(item) = self.shared.queue.pop().await {
            tracing::debug!(item = %item.label(), "executing work item");
            self.execute(item);
        }
    }

    fn execute(&mut self, item: WorkItem) {
        let label = item.label();
        match item {
            WorkItem::LoadScripts {
                tag,
                sources,
                responder,
            } => {
                let result = catch(&label, || self.load_scripts(tag, sources)).and_then(|result| result);
                self.reply(responder, result);
            }
            WorkItem::LoadBuffer {
                tag,
                source,
                responder,
            } => {
                let result = catch(&label, || self.load_buffer(tag, source)).and_then(|result| result);
                self.reply(responder, result);
            }
            WorkItem::Call {
                function_name,
                args,
                responder,
            } => {
                let result = catch(&label, || self.call(&function_name, args)).and_then(|result| result);
                self.reply(responder, result);
            }
            WorkItem::AwaitCall {
                function_name,
                args,
                callbacks,
                responder,
            } => {
                let result = catch(&label, || self.await_call(&function_name, args, callbacks))
                    .and_then(|result| result);
                self.reply(responder, result);
            }
        }
    }

    /// Retire the item before answering, so a caller that wakes on the reply
    /// already sees it counted as completed.
    fn reply<T>(&self, responder: Completion<T>, result: Result<T, DispatchError>) {
        self.shared.inflight.finish();
        let _ = responder.send(result);
    }

    fn load_scripts(&mut self, tag: String, sources: Vec<PathBuf>) -> Result<(), DispatchError> {
        self.runtime.load_from_file(&tag, &sources).map_err(|err| {
            tracing::debug!(%tag, error = %err, "runtime rejected script files");
            DispatchError::LoadFailure {
                tag,
                sources: LoadSource::Files(sources),
            }
        })
    }

    fn load_buffer(&mut self, tag: String, source: Vec<u8>) -> Result<(), DispatchError> {
        self.runtime.load_from_memory(&tag, &source).map_err(|err| {
            tracing::debug!(%tag, error = %err, "runtime rejected script buffer");
            DispatchError::LoadFailure {
                tag,
                sources: LoadSource::Buffer(source),
            }
        })
    }

    fn resolve(&mut self, name: &str) -> Result<FunctionRef, DispatchError> {
        self.runtime
            .resolve_function(name)
            .ok_or_else(|| DispatchError::FunctionNotFound {
                name: name.to_string(),
            })
    }

    fn lower_args(&self, args: Vec<HostValue>) -> Result<Vec<Value>, DispatchError> {
        args.into_iter()
            .enumerate()
            .map(|(index, arg)| {
                self.marshaler
                    .try_to_runtime(arg)
                    .map_err(|source| DispatchError::UnsupportedValueConversion { index, source })
            })
            .collect()
    }

    fn lift(
        &self,
        function_name: &str,
        result: Result<Option<Value>, RuntimeError>,
    ) -> Result<CallOutcome, DispatchError> {
        match result {
            Ok(Some(value)) => Ok(CallOutcome::Value(self.marshaler.to_host(value))),
            Ok(None) => Ok(CallOutcome::NoValue),
            Err(source) => Err(DispatchError::CallFailed {
                function: function_name.to_string(),
                source,
            }),
        }
    }

    fn call(&mut self, function_name: &str, args: Vec<HostValue>) -> Result<CallOutcome, DispatchError> {
        let function = self.resolve(function_name)?;
        let args = self.lower_args(args)?;
        let result = self.runtime.invoke(function, &args);
        drop(args);
        self.lift(function_name, result)
    }

    fn await_call(
        &mut self,
        function_name: &str,
        args: Vec<HostValue>,
        callbacks: AwaitCallbacks,
    ) -> Result<CallOutcome, DispatchError> {
        let function = self.resolve(function_name)?;
        let args = self.lower_args(args)?;

        let registry = self.shared.callbacks.clone();
        let async_callbacks = if callbacks.is_empty() {
            AsyncCallbacks::none()
        } else {
            let resolve = callbacks
                .has_resolve()
                .then(|| Trampoline::new(registry.clone(), Outcome::Resolve));
            let reject = callbacks
                .has_reject()
                .then(|| Trampoline::new(registry.clone(), Outcome::Reject));
            let handle = registry.register(callbacks);
            tracing::debug!(%handle, function = function_name, "registered async callbacks");
            AsyncCallbacks {
                resolve,
                reject,
                context: Some(handle),
            }
        };

        let context = async_callbacks.context;
        // Caught here as well so a panicking submission still withdraws its
        // handle.
        let operation = format!("await {function_name}");
        let result = catch(&operation, || self.runtime.invoke_async(function, &args, async_callbacks))
            .and_then(|result| self.lift(function_name, result));
        drop(args);

        if result.is_err() {
            if let Some(handle) = context {
                registry.withdraw(handle);
            }
        }
        result
    }

    /// Wait for outstanding async callbacks, then tear the runtime down.
    fn shutdown(mut self) {
        if !self.shared.inflight.wait_idle(self.drain_timeout) {
            let stats = self.shared.stats();
            tracing::warn!(
                pending = stats.pending,
                live_handles = stats.live_handles,
                "drain timed out; destroying runtime with callbacks still registered"
            );
        }
        self.runtime.destroy();
        tracing::info!("runtime destroyed; owner thread exiting");
    }
}

/// Run one runtime operation, turning a panic into an error for the caller
/// whose item triggered it.
fn catch<T>(operation: &str, f: impl FnOnce() -> T) -> Result<T, DispatchError> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        tracing::error!(%operation, %message, "runtime panicked");
        DispatchError::RuntimePanicked {
            operation: operation.to_string(),
            message,
        }
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Closes the queue when the owner thread leaves its serve loop, however it
/// leaves. Items still queued are retired unanswered, so their callers get
/// `Disconnected` and later submissions get `NotRunning`.
struct CloseOnExit(Arc<Shared>);

impl Drop for CloseOnExit {
    fn drop(&mut self) {
        self.0.queue.close();
        let mut dropped = 0usize;
        while let Some(item) = self.0.queue.try_pop() {
            tracing::debug!(item = %item.label(), "dropping work item after owner exit");
            self.0.inflight.finish();
            dropped += 1;
        }
        if dropped > 0 {
            tracing::warn!(dropped, "owner thread exited with work still queued");
        }
    }
}
