//! Token table standing in for host closures across the runtime boundary.
//!
//! The runtime never sees a host pointer. It receives a [`Handle`], a plain
//! integer, and presents it back when it wants a callback fired. Entries are
//! removed on first use, so a closure runs at most once no matter how many
//! times, or from how many threads, the runtime echoes the token.

use super::host_value::HostValue;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU64;

/// Opaque caller data echoed to whichever closure fires.
pub type CallContext = Box<dyn Any + Send>;

/// Host closure invoked with the async result and the caller's context.
/// Its return value is handed back to the runtime.
pub type AwaitCallback = Box<dyn FnOnce(HostValue, Option<CallContext>) -> HostValue + Send>;

/// Opaque token identifying one registered set of callbacks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(NonZeroU64);

impl Handle {
    /// Raw form for runtimes that store the token in foreign memory.
    pub fn as_u64(self) -> u64 {
        self.0.get()
    }

    pub fn from_u64(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which callback the runtime asked for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Resolve,
    Reject,
}

/// Resolve/reject closures plus opaque context for one asynchronous call.
#[derive(Default)]
pub struct AwaitCallbacks {
    resolve: Option<AwaitCallback>,
    reject: Option<AwaitCallback>,
    context: Option<CallContext>,
}

impl AwaitCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_resolve<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(HostValue, Option<CallContext>) -> HostValue + Send + 'static,
    {
        self.resolve = Some(Box::new(callback));
        self
    }

    pub fn on_reject<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(HostValue, Option<CallContext>) -> HostValue + Send + 'static,
    {
        self.reject = Some(Box::new(callback));
        self
    }

    pub fn with_context(mut self, context: CallContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn has_resolve(&self) -> bool {
        self.resolve.is_some()
    }

    pub fn has_reject(&self) -> bool {
        self.reject.is_some()
    }

    /// True when neither closure is set; such calls need no table entry.
    pub fn is_empty(&self) -> bool {
        self.resolve.is_none() && self.reject.is_none()
    }

    /// Run the closure for `outcome`, consuming the whole set.
    pub(crate) fn fire(self, outcome: Outcome, value: HostValue) -> HostValue {
        let callback = match outcome {
            Outcome::Resolve => self.resolve,
            Outcome::Reject => self.reject,
        };
        match callback {
            Some(callback) => callback(value, self.context),
            None => HostValue::Null,
        }
    }
}

impl fmt::Debug for AwaitCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwaitCallbacks")
            .field("resolve", &self.resolve.is_some())
            .field("reject", &self.reject.is_some())
            .field("context", &self.context.is_some())
            .finish()
    }
}

struct TableState {
    next_token: NonZeroU64,
    entries: HashMap<Handle, AwaitCallbacks>,
}

/// Registry of pending asynchronous callbacks.
///
/// The lock covers map access only; callers run the taken closures after
/// it has been released.
pub struct HandleTable {
    state: Mutex<TableState>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TableState {
                next_token: NonZeroU64::MIN,
                entries: HashMap::new(),
            }),
        }
    }

    /// Register callbacks and return the token that stands for them.
    ///
    /// Tokens come from a monotonic counter. If it ever wraps, tokens that
    /// are still registered are skipped, so no live token is handed out
    /// twice.
    pub fn insert(&self, callbacks: AwaitCallbacks) -> Handle {
        let mut state = self.state.lock();
        let mut token = state.next_token;
        while state.entries.contains_key(&Handle(token)) {
            token = successor(token);
        }
        state.next_token = successor(token);
        let handle = Handle(token);
        state.entries.insert(handle, callbacks);
        handle
    }

    /// Remove and return the callbacks for `handle`.
    ///
    /// Returns `None` if the token is unknown or was already taken.
    pub fn take(&self, handle: Handle) -> Option<AwaitCallbacks> {
        self.state.lock().entries.remove(&handle)
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.state.lock().entries.contains_key(&handle)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn successor(token: NonZeroU64) -> NonZeroU64 {
    token.checked_add(1).unwrap_or_else(|| {
        tracing::warn!("handle tokens exhausted; wrapping around");
        NonZeroU64::MIN
    })
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}
