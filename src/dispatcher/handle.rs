//! Caller-facing handle for the owner thread.

use super::config::DispatcherConfig;
use super::conversion::Marshaler;
use super::engine::{Runtime, RuntimeFactory};
use super::error::DispatchError;
use super::handle_table::AwaitCallbacks;
use super::host_value::HostValue;
use super::queue::{CallOutcome, Completion, InflightStats, WorkItem};
use super::runner::{spawn_owner_thread, Shared};
use parking_lot::Mutex;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;

type Reply<T> = oneshot::Receiver<Result<T, DispatchError>>;

/// Lifecycle of a [`Dispatcher`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatcherState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

struct Slot {
    state: DispatcherState,
    /// The most recent session. Kept after stop so `stats()` still reports
    /// on it.
    session: Option<Arc<Shared>>,
}

struct Inner {
    config: DispatcherConfig,
    factory: RuntimeFactory,
    /// Held across start and stop so they serialize.
    lifecycle: Mutex<Option<JoinHandle<()>>>,
    slot: Mutex<Slot>,
}

/// Serializes every runtime operation onto one owner thread.
///
/// Cloning is cheap; all clones drive the same owner thread. Synchronous
/// methods block the calling thread until the owner answers and must not be
/// called from inside an async context; use the `*_async` variants there.
/// Dropping the last clone of a running dispatcher stops it.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("thread_name", &self.inner.config.thread_name)
            .field("state", &self.state())
            .finish()
    }
}

impl Dispatcher {
    /// Create a stopped dispatcher. `factory` is called on the owner thread
    /// at every start to build a fresh runtime.
    pub fn new<F, R>(config: DispatcherConfig, factory: F) -> Self
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: Runtime + 'static,
    {
        let factory: RuntimeFactory = Arc::new(move || Box::new(factory()) as Box<dyn Runtime>);
        Self::with_factory(config, factory)
    }

    pub fn with_factory(config: DispatcherConfig, factory: RuntimeFactory) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                factory,
                lifecycle: Mutex::new(None),
                slot: Mutex::new(Slot {
                    state: DispatcherState::Stopped,
                    session: None,
                }),
            }),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    pub fn state(&self) -> DispatcherState {
        self.inner.slot.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == DispatcherState::Running
    }

    /// Counters for the current, or most recent, session.
    pub fn stats(&self) -> InflightStats {
        self.session().map(|s| s.stats()).unwrap_or_default()
    }

    fn session(&self) -> Option<Arc<Shared>> {
        self.inner.slot.lock().session.clone()
    }

    fn set_state(&self, state: DispatcherState) {
        self.inner.slot.lock().state = state;
    }

    /// Spawn the owner thread and initialize the runtime.
    ///
    /// Returns once initialization finished. Starting a running dispatcher
    /// is a no-op.
    pub fn start(&self) -> Result<(), DispatchError> {
        // The owner thread only exists while running; asking it to start
        // again must not wait on the lifecycle lock a concurrent stop holds.
        if self.session().is_some_and(|s| s.is_owner_thread()) {
            return Ok(());
        }

        let mut owner = self.inner.lifecycle.lock();
        if self.state() == DispatcherState::Running {
            return Ok(());
        }
        self.inner.config.validate()?;

        self.set_state(DispatcherState::Starting);
        let shared = Arc::new(Shared::new(Marshaler::new(self.inner.config.max_value_depth)));

        match spawn_owner_thread(&self.inner.config, self.inner.factory.clone(), shared.clone()) {
            Ok(thread) => {
                *owner = Some(thread);
                let mut slot = self.inner.slot.lock();
                slot.session = Some(shared);
                slot.state = DispatcherState::Running;
                tracing::info!(thread = %self.inner.config.thread_name, "dispatcher started");
                Ok(())
            }
            Err(err) => {
                self.set_state(DispatcherState::Stopped);
                tracing::warn!(error = %err, "dispatcher failed to start");
                Err(err)
            }
        }
    }

    /// Stop accepting work, drain what was submitted, wait for registered
    /// async callbacks and destroy the runtime.
    ///
    /// Must not be called from the owner thread or from inside an async
    /// callback, since both would wait on themselves.
    pub fn stop(&self) -> Result<(), DispatchError> {
        if self.session().is_some_and(|s| s.is_owner_thread()) {
            return Err(DispatchError::Reentrant);
        }

        let mut owner = self.inner.lifecycle.lock();
        let session = {
            let mut slot = self.inner.slot.lock();
            if slot.state != DispatcherState::Running {
                return Ok(());
            }
            slot.state = DispatcherState::Stopping;
            slot.session.clone()
        };

        if let Some(session) = &session {
            session.queue.close();
        }

        let joined = match owner.take() {
            Some(thread) => thread.join(),
            None => Ok(()),
        };
        self.set_state(DispatcherState::Stopped);

        match joined {
            Ok(()) => {
                tracing::info!(thread = %self.inner.config.thread_name, "dispatcher stopped");
                Ok(())
            }
            Err(_) => {
                tracing::error!("owner thread panicked");
                Err(DispatchError::Disconnected)
            }
        }
    }

    fn submit<T>(&self, build: impl FnOnce(Completion<T>) -> WorkItem) -> Result<Reply<T>, DispatchError> {
        let shared = {
            let slot = self.inner.slot.lock();
            match &slot.session {
                Some(shared) if shared.is_owner_thread() => return Err(DispatchError::Reentrant),
                Some(shared) if slot.state == DispatcherState::Running => shared.clone(),
                _ => return Err(DispatchError::NotRunning),
            }
        };

        let (responder, reply) = oneshot::channel();
        shared.inflight.begin();
        if shared.queue.push(build(responder)).is_err() {
            shared.inflight.finish();
            return Err(DispatchError::NotRunning);
        }
        Ok(reply)
    }

    fn wait<T>(reply: Reply<T>) -> Result<T, DispatchError> {
        match reply.blocking_recv() {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Disconnected),
        }
    }

    async fn wait_async<T>(reply: Reply<T>) -> Result<T, DispatchError> {
        match reply.await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Disconnected),
        }
    }

    fn load_scripts_item<P>(tag: &str, paths: P) -> impl FnOnce(Completion<()>) -> WorkItem
    where
        P: IntoIterator,
        P::Item: Into<PathBuf>,
    {
        let tag = tag.to_string();
        let sources: Vec<PathBuf> = paths.into_iter().map(Into::into).collect();
        move |responder| WorkItem::LoadScripts {
            tag,
            sources,
            responder,
        }
    }

    fn load_buffer_item(tag: &str, buffer: Vec<u8>) -> impl FnOnce(Completion<()>) -> WorkItem {
        let tag = tag.to_string();
        move |responder| WorkItem::LoadBuffer {
            tag,
            source: buffer,
            responder,
        }
    }

    fn call_item(function_name: &str, args: Vec<HostValue>) -> impl FnOnce(Completion<CallOutcome>) -> WorkItem {
        let function_name = function_name.to_string();
        move |responder| WorkItem::Call {
            function_name,
            args,
            responder,
        }
    }

    fn await_call_item(
        function_name: &str,
        args: Vec<HostValue>,
        callbacks: AwaitCallbacks,
    ) -> impl FnOnce(Completion<CallOutcome>) -> WorkItem {
        let function_name = function_name.to_string();
        move |responder| WorkItem::AwaitCall {
            function_name,
            args,
            callbacks,
            responder,
        }
    }

    /// Load script files, in order, with the loader named by `tag`.
    pub fn load_from_file<P>(&self, tag: &str, paths: P) -> Result<(), DispatchError>
    where
        P: IntoIterator,
        P::Item: Into<PathBuf>,
    {
        Self::wait(self.submit(Self::load_scripts_item(tag, paths))?)
    }

    /// Load a script from memory. The buffer may contain NUL bytes.
    pub fn load_from_memory(&self, tag: &str, buffer: impl Into<Vec<u8>>) -> Result<(), DispatchError> {
        Self::wait(self.submit(Self::load_buffer_item(tag, buffer.into()))?)
    }

    /// Call a function and wait for its result.
    pub fn call(&self, function_name: &str, args: Vec<HostValue>) -> Result<CallOutcome, DispatchError> {
        Self::wait(self.submit(Self::call_item(function_name, args))?)
    }

    /// Start an asynchronous call.
    ///
    /// Returns once the runtime accepted the submission; the eventual
    /// outcome is delivered later to one of the closures in `callbacks`,
    /// possibly on another thread.
    pub fn await_call(
        &self,
        function_name: &str,
        args: Vec<HostValue>,
        callbacks: AwaitCallbacks,
    ) -> Result<CallOutcome, DispatchError> {
        Self::wait(self.submit(Self::await_call_item(function_name, args, callbacks))?)
    }

    pub async fn load_from_file_async<P>(&self, tag: &str, paths: P) -> Result<(), DispatchError>
    where
        P: IntoIterator,
        P::Item: Into<PathBuf>,
    {
        let reply = self.submit(Self::load_scripts_item(tag, paths))?;
        Self::wait_async(reply).await
    }

    pub async fn load_from_memory_async(
        &self,
        tag: &str,
        buffer: impl Into<Vec<u8>>,
    ) -> Result<(), DispatchError> {
        let reply = self.submit(Self::load_buffer_item(tag, buffer.into()))?;
        Self::wait_async(reply).await
    }

    pub async fn call_async(
        &self,
        function_name: &str,
        args: Vec<HostValue>,
    ) -> Result<CallOutcome, DispatchError> {
        let reply = self.submit(Self::call_item(function_name, args))?;
        Self::wait_async(reply).await
    }

    pub async fn await_call_async(
        &self,
        function_name: &str,
        args: Vec<HostValue>,
        callbacks: AwaitCallbacks,
    ) -> Result<CallOutcome, DispatchError> {
        let reply = self.submit(Self::await_call_item(function_name, args, callbacks))?;
        Self::wait_async(reply).await
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let Some(thread) = self.lifecycle.get_mut().take() else {
            return;
        };
        let slot = self.slot.get_mut();
        slot.state = DispatcherState::Stopping;

        if let Some(session) = &slot.session {
            session.queue.close();
            if session.is_owner_thread() {
                // Joining ourselves would hang; the thread exits on its own
                // once the queue drains.
                tracing::warn!("dispatcher dropped on its owner thread; not joining");
                return;
            }
        }

        if thread.join().is_err() {
            tracing::error!("owner thread panicked");
        }
        slot.state = DispatcherState::Stopped;
    }
}
