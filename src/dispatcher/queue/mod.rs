//! Multi-producer, single-consumer hand-off queue for the owner thread.
//!
//! Producers append under a short lock and never wait on the consumer. The
//! consumer either polls with [`WorkQueue::try_pop`] or subscribes with
//! [`WorkQueue::pop`], which parks on a [`Notify`] watcher while the queue is
//! empty. Every push leaves one wake-up permit, so a consumer that checked
//! the queue just before a push still gets woken.
//!
//! Back-pressure: the queue itself is unbounded. Each producer blocks on its
//! own completion slot after pushing, so the number of queued items never
//! exceeds the number of caller threads.

mod inflight;
mod work_item;

pub use inflight::{Inflight, InflightStats};
pub(crate) use inflight::FinishOnDrop;
pub use work_item::{CallOutcome, Completion, WorkItem};

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use tokio::sync::Notify;

/// Returned by [`WorkQueue::push`] after the queue was closed; carries the
/// rejected item back to the producer.
pub struct QueueClosed<T>(pub T);

impl<T> fmt::Debug for QueueClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueueClosed(..)")
    }
}

impl<T> fmt::Display for QueueClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("work queue is closed")
    }
}

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// FIFO queue with close/drain semantics.
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    watcher: Notify,
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            watcher: Notify::new(),
        }
    }

    /// Append an item. Fails once the queue has been closed.
    pub fn push(&self, item: T) -> Result<(), QueueClosed<T>> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(QueueClosed(item));
            }
            state.items.push_back(item);
        }
        self.watcher.notify_one();
        Ok(())
    }

    /// Take the oldest item without waiting.
    pub fn try_pop(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    /// Take the oldest item, waiting while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and fully drained.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.watcher.notified();
            tokio::pin!(notified);
            // Register before looking so a close between the check and the
            // await is not missed.
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Reject further pushes. Items already queued stay poppable.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.watcher.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
