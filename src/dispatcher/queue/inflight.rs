//! Counting wait used to drain outstanding work before teardown.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    submitted: u64,
    completed: u64,
}

impl Counts {
    fn pending(&self) -> u64 {
        self.submitted - self.completed
    }
}

/// Tracks every unit of work that must finish before the runtime may be
/// destroyed: queued work items and registered async callbacks alike.
#[derive(Debug, Default)]
pub struct Inflight {
    counts: Mutex<Counts>,
    idle: Condvar,
}

impl Inflight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) {
        self.counts.lock().submitted += 1;
    }

    pub fn finish(&self) {
        let mut counts = self.counts.lock();
        debug_assert!(counts.completed < counts.submitted, "finish without begin");
        counts.completed += 1;
        if counts.pending() == 0 {
            self.idle.notify_all();
        }
    }

    pub fn pending(&self) -> u64 {
        self.counts.lock().pending()
    }

    pub fn submitted(&self) -> u64 {
        self.counts.lock().submitted
    }

    pub fn completed(&self) -> u64 {
        self.counts.lock().completed
    }

    /// Block until nothing is pending.
    ///
    /// With a timeout, returns `false` if work was still pending when it
    /// elapsed. Without one, waits indefinitely and always returns `true`.
    pub fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut counts = self.counts.lock();
        while counts.pending() > 0 {
            match deadline {
                Some(deadline) => {
                    if self.idle.wait_until(&mut counts, deadline).timed_out() {
                        return counts.pending() == 0;
                    }
                }
                None => self.idle.wait(&mut counts),
            }
        }
        true
    }
}

/// Point-in-time view of a dispatcher's workload.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InflightStats {
    /// Units of work started but not finished (queued, executing, or
    /// awaiting an async callback).
    pub pending: u64,
    pub submitted: u64,
    pub completed: u64,
    /// Items waiting in the queue.
    pub queued: usize,
    /// Async callbacks registered and not yet fired.
    pub live_handles: usize,
}

/// Finishes one unit of work when dropped, so a panicking callback still
/// releases the drain.
pub(crate) struct FinishOnDrop<'a>(pub(crate) &'a Inflight);

impl Drop for FinishOnDrop<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}
