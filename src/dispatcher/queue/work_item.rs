//! Units of work handed from caller threads to the owner thread.

use crate::dispatcher::error::DispatchError;
use crate::dispatcher::handle_table::AwaitCallbacks;
use crate::dispatcher::host_value::HostValue;
use std::path::PathBuf;
use tokio::sync::oneshot;

/// Single-use completion slot answered by the owner thread.
pub type Completion<T> = oneshot::Sender<Result<T, DispatchError>>;

/// Result of a call that did not fail.
///
/// `NoValue` means the runtime produced nothing at all, which is different
/// from producing an explicit null.
#[derive(Clone, Debug, PartialEq)]
pub enum CallOutcome {
    Value(HostValue),
    NoValue,
}

impl CallOutcome {
    pub fn value(self) -> Option<HostValue> {
        match self {
            CallOutcome::Value(value) => Some(value),
            CallOutcome::NoValue => None,
        }
    }

    pub fn is_no_value(&self) -> bool {
        matches!(self, CallOutcome::NoValue)
    }
}

/// Work submitted to the owner thread.
pub enum WorkItem {
    LoadScripts {
        tag: String,
        sources: Vec<PathBuf>,
        responder: Completion<()>,
    },
    LoadBuffer {
        tag: String,
        source: Vec<u8>,
        responder: Completion<()>,
    },
    Call {
        function_name: String,
        args: Vec<HostValue>,
        responder: Completion<CallOutcome>,
    },
    AwaitCall {
        function_name: String,
        args: Vec<HostValue>,
        callbacks: AwaitCallbacks,
        responder: Completion<CallOutcome>,
    },
}

impl WorkItem {
    /// Short description for logs.
    pub fn label(&self) -> String {
        match self {
            WorkItem::LoadScripts { tag, sources, .. } => {
                format!("load {} file(s) with {tag}", sources.len())
            }
            WorkItem::LoadBuffer { tag, source, .. } => {
                format!("load {}-byte buffer with {tag}", source.len())
            }
            WorkItem::Call { function_name, .. } => format!("call {function_name}"),
            WorkItem::AwaitCall { function_name, .. } => format!("await {function_name}"),
        }
    }
}
