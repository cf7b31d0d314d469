//! Scripted in-process runtime for exercising the dispatcher.
//!
//! The `mock` loader understands a tiny line format:
//!
//! ```text
//! # comment
//! export echo          # echo(x) -> x
//! export async later   # resolves with its first argument from another thread
//! ```
//!
//! NUL bytes in a buffer act as line breaks. Files loaded with
//! `load_from_file` use the same format. Extra functions
//! with arbitrary behaviour can be installed on the [`Script`]. Every method
//! checks it runs on the thread that built the runtime and counts
//! violations.

use super::engine::{AsyncCallbacks, FunctionRef, Runtime, RuntimeError};
use super::value::Value;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

pub(crate) const MOCK_TAG: &str = "mock";

pub(crate) type SyncFn = Arc<dyn Fn(&[Value]) -> Result<Option<Value>, RuntimeError> + Send + Sync>;

/// How an async function settles.
#[derive(Clone, Debug)]
pub(crate) enum AsyncBehavior {
    /// Resolve with the first argument after `delay`, from another thread.
    Resolve { delay: Duration },
    /// Reject with the first argument after `delay`, from another thread.
    Reject { delay: Duration },
    /// Resolve with the first argument before `invoke_async` returns, on the
    /// calling thread.
    ResolveInline,
    /// Fire resolve and reject repeatedly from several threads at once.
    Storm { threads: usize },
    /// Refuse the submission.
    Refuse(RuntimeError),
}

#[derive(Clone)]
enum Function {
    Echo,
    Sync(SyncFn),
    Async(AsyncBehavior),
}

/// Shared configuration and observation point for every runtime a factory
/// builds.
#[derive(Clone, Default)]
pub(crate) struct Script {
    functions: Arc<Mutex<HashMap<String, Function>>>,
    fail_init: Option<RuntimeError>,
    log: Arc<Mutex<Vec<String>>>,
    violations: Arc<AtomicUsize>,
}

impl Script {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_function<F>(self, name: &str, function: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Option<Value>, RuntimeError> + Send + Sync + 'static,
    {
        self.functions
            .lock()
            .insert(name.to_string(), Function::Sync(Arc::new(function)));
        self
    }

    pub(crate) fn with_async_function(self, name: &str, behavior: AsyncBehavior) -> Self {
        self.functions
            .lock()
            .insert(name.to_string(), Function::Async(behavior));
        self
    }

    pub(crate) fn failing_init(mut self, code: i32, message: &str) -> Self {
        self.fail_init = Some(RuntimeError::new(code, message));
        self
    }

    /// Everything the runtimes did, in order.
    pub(crate) fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub(crate) fn count(&self, entry: &str) -> usize {
        self.log.lock().iter().filter(|e| *e == entry).count()
    }

    /// Calls made from a thread other than the one that built the runtime.
    pub(crate) fn violations(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }

    pub(crate) fn runtime(&self) -> ScriptedRuntime {
        ScriptedRuntime::new(self.clone())
    }

    pub(crate) fn note(&self, entry: impl Into<String>) {
        self.log.lock().push(entry.into());
    }
}

pub(crate) struct ScriptedRuntime {
    script: Script,
    home: ThreadId,
    loaded: HashMap<String, Function>,
    names: Vec<String>,
}

impl ScriptedRuntime {
    fn new(script: Script) -> Self {
        Self {
            script,
            home: thread::current().id(),
            loaded: HashMap::new(),
            names: Vec::new(),
        }
    }

    fn check_thread(&self) {
        if thread::current().id() != self.home {
            self.script.violations.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn parse(&mut self, tag: &str, source: &str) -> Result<(), RuntimeError> {
        if tag != MOCK_TAG {
            return Err(RuntimeError::new(1, format!("no loader for tag '{tag}'")));
        }

        let mut parsed = Vec::new();
        for (lineno, line) in source.lines().enumerate() {
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let words: Vec<&str> = line.split_whitespace().collect();
            match words.as_slice() {
                ["export", name] => parsed.push((name.to_string(), Function::Echo)),
                ["export", "async", name] => parsed.push((
                    name.to_string(),
                    Function::Async(AsyncBehavior::Resolve {
                        delay: Duration::ZERO,
                    }),
                )),
                _ => {
                    return Err(RuntimeError::new(
                        3,
                        format!("syntax error on line {}: {line}", lineno + 1),
                    ))
                }
            }
        }

        self.loaded.extend(parsed);
        Ok(())
    }

    fn function(&self, function: FunctionRef) -> Result<(String, Function), RuntimeError> {
        let name = usize::try_from(function.0)
            .ok()
            .and_then(|index| self.names.get(index))
            .ok_or_else(|| RuntimeError::new(4, "stale function reference"))?;
        let body = self
            .script
            .functions
            .lock()
            .get(name)
            .cloned()
            .or_else(|| self.loaded.get(name).cloned())
            .ok_or_else(|| RuntimeError::new(4, format!("{name} was unloaded")))?;
        Ok((name.clone(), body))
    }
}

fn first(args: &[Value]) -> Value {
    args.first().cloned().unwrap_or(Value::Null)
}

fn settle_later(callbacks: AsyncCallbacks, value: Value, delay: Duration, resolve: bool) {
    thread::spawn(move || {
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        if resolve {
            callbacks.resolve(value);
        } else {
            callbacks.reject(value);
        }
    });
}

impl Runtime for ScriptedRuntime {
    fn initialize(&mut self) -> Result<(), RuntimeError> {
        self.check_thread();
        self.script.note("initialize");
        match &self.script.fail_init {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn destroy(&mut self) {
        self.check_thread();
        self.loaded.clear();
        self.script.note("destroy");
    }

    fn load_from_file(&mut self, tag: &str, paths: &[PathBuf]) -> Result<(), RuntimeError> {
        self.check_thread();
        for path in paths {
            let source = std::fs::read_to_string(path)
                .map_err(|err| RuntimeError::new(2, format!("{}: {err}", path.display())))?;
            self.parse(tag, &source)?;
        }
        self.script.note(format!("load {} file(s)", paths.len()));
        Ok(())
    }

    fn load_from_memory(&mut self, tag: &str, buffer: &[u8]) -> Result<(), RuntimeError> {
        self.check_thread();
        // The buffer is length-delimited; a NUL only separates lines.
        let source = std::str::from_utf8(buffer).map_err(|err| RuntimeError::new(3, err.to_string()))?;
        self.parse(tag, &source.replace('\0', "\n"))?;
        self.script.note(format!("load buffer {} bytes", buffer.len()));
        Ok(())
    }

    fn resolve_function(&mut self, name: &str) -> Option<FunctionRef> {
        self.check_thread();
        let known = self.loaded.contains_key(name) || self.script.functions.lock().contains_key(name);
        if !known {
            return None;
        }
        let index = match self.names.iter().position(|n| n == name) {
            Some(index) => index,
            None => {
                self.names.push(name.to_string());
                self.names.len() - 1
            }
        };
        Some(FunctionRef(index as u64))
    }

    fn invoke(&mut self, function: FunctionRef, args: &[Value]) -> Result<Option<Value>, RuntimeError> {
        self.check_thread();
        let (name, body) = self.function(function)?;
        self.script.note(format!("invoke {name}"));
        match body {
            Function::Echo => Ok(args.first().cloned()),
            Function::Sync(f) => f(args),
            Function::Async(_) => Err(RuntimeError::new(5, format!("{name} is async"))),
        }
    }

    fn invoke_async(
        &mut self,
        function: FunctionRef,
        args: &[Value],
        callbacks: AsyncCallbacks,
    ) -> Result<Option<Value>, RuntimeError> {
        self.check_thread();
        let (name, body) = self.function(function)?;
        self.script.note(format!("invoke_async {name}"));

        let behavior = match body {
            Function::Async(behavior) => behavior,
            Function::Echo => AsyncBehavior::ResolveInline,
            Function::Sync(f) => {
                // Plain functions settle immediately with their result.
                let value = f(args)?.unwrap_or(Value::Null);
                callbacks.resolve(value);
                return Ok(None);
            }
        };

        match behavior {
            AsyncBehavior::Resolve { delay } => settle_later(callbacks, first(args), delay, true),
            AsyncBehavior::Reject { delay } => settle_later(callbacks, first(args), delay, false),
            AsyncBehavior::ResolveInline => {
                callbacks.resolve(first(args));
            }
            AsyncBehavior::Storm { threads } => {
                for i in 0..threads {
                    let callbacks = callbacks.clone();
                    let value = first(args);
                    thread::spawn(move || {
                        if i % 2 == 0 {
                            callbacks.resolve(value);
                        } else {
                            callbacks.reject(value);
                        }
                    });
                }
            }
            AsyncBehavior::Refuse(err) => return Err(err),
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_loader_syntax() {
        let mut runtime = Script::new().runtime();
        runtime
            .load_from_memory(MOCK_TAG, b"# header\nexport f\nexport async g # trailing\n")
            .unwrap();
        assert!(runtime.resolve_function("f").is_some());
        assert!(runtime.resolve_function("g").is_some());
        assert!(runtime.resolve_function("h").is_none());

        assert!(runtime.load_from_memory("python", b"export f").is_err());
        assert!(runtime.load_from_memory(MOCK_TAG, b"def f(): pass").is_err());
        // Text after a NUL is still parsed.
        assert!(runtime.load_from_memory(MOCK_TAG, b"export f\0garbage").is_err());
    }

    #[test]
    fn test_echo() {
        let mut runtime = Script::new().runtime();
        runtime.load_from_memory(MOCK_TAG, b"export f\0# trailing").unwrap();
        let f = runtime.resolve_function("f").unwrap();
        assert_eq!(runtime.invoke(f, &[Value::Int(42)]), Ok(Some(Value::Int(42))));
        assert_eq!(runtime.invoke(f, &[]), Ok(None));
        assert_eq!(runtime.resolve_function("f"), Some(f));
    }
}
