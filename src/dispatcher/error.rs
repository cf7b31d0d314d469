//! Error types surfaced by the dispatcher.

use super::config::ConfigError;
use super::engine::RuntimeError;
use super::handle_table::Handle;
use std::fmt;
use std::path::PathBuf;

/// Which way a conversion was travelling when it failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    ToRuntime,
    ToHost,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ToRuntime => f.write_str("host -> runtime"),
            Direction::ToHost => f.write_str("runtime -> host"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarshalError {
    #[error("unsupported value conversion ({direction}): {kind} has no exact counterpart")]
    Unsupported { direction: Direction, kind: String },
    #[error("value nesting exceeded maximum depth of {max}")]
    DepthExceeded { max: usize },
}

/// What a failed load was asked to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadSource {
    Files(Vec<PathBuf>),
    Buffer(Vec<u8>),
}

const BUFFER_PREVIEW_BYTES: usize = 64;

impl fmt::Display for LoadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadSource::Files(paths) => {
                let names: Vec<_> = paths.iter().map(|p| p.display().to_string()).collect();
                write!(f, "the list: {names:?}")
            }
            LoadSource::Buffer(bytes) => {
                let shown = &bytes[..bytes.len().min(BUFFER_PREVIEW_BYTES)];
                let ellipsis = if bytes.len() > BUFFER_PREVIEW_BYTES { "..." } else { "" };
                write!(
                    f,
                    "the buffer ({} bytes): {}{ellipsis}",
                    bytes.len(),
                    String::from_utf8_lossy(shown)
                )
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("initializing runtime (error code {code}): {message}")]
    InitializationFailure { code: i32, message: String },

    #[error("function not found: {name}")]
    FunctionNotFound { name: String },

    #[error("{tag} loader failed to load a script from {sources}")]
    LoadFailure { tag: String, sources: LoadSource },

    #[error("argument {index}: {source}")]
    UnsupportedValueConversion {
        index: usize,
        #[source]
        source: MarshalError,
    },

    /// Only produced for diagnostics; never delivered to a caller.
    #[error("no callback registered for handle {0}")]
    HandleNotFound(Handle),

    #[error("call to '{function}' failed: {source}")]
    CallFailed {
        function: String,
        #[source]
        source: RuntimeError,
    },

    /// The runtime panicked while running one item. Only that item fails;
    /// the owner thread keeps serving.
    #[error("runtime panicked during {operation}: {message}")]
    RuntimePanicked { operation: String, message: String },

    #[error("dispatcher is not running")]
    NotRunning,

    #[error("dispatcher cannot be driven from its own owner thread")]
    Reentrant,

    #[error("owner thread dropped the request without answering")]
    Disconnected,

    #[error("failed to spawn owner thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("invalid dispatcher configuration: {0}")]
    Config(#[from] ConfigError),
}
