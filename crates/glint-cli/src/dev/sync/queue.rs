//! Per-key serialized task queue feeding the sync workers.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Notify;

use super::{Priority, SyncOp, SyncTask};

/// A task waiting in the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTask {
    pub op: SyncOp,
    pub priority: Priority,
    /// Time of the most recent local change merged into this task
    pub queued_at: DateTime<Utc>,
}

/// Snapshot of queue occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Pending tasks in the high lane
    pub pending_high: usize,
    /// Pending tasks in the low lane
    pub pending_low: usize,
    /// Keys held by a worker or the remote watcher
    pub in_flight: usize,
}

/// Two-lane task queue with at most one task per key.
///
/// A key is either pending, in flight, or both: pushing a key that is in
/// flight parks the new task until [`TaskQueue::complete`] is called for it,
/// so two tasks for the same key never run concurrently. Lanes may hold
/// stale entries for keys that were merged or upgraded; `pending` is the
/// source of truth.
#[derive(Debug, Default)]
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    work: Notify,
    idle: Notify,
}

#[derive(Debug, Default)]
struct QueueInner {
    high: VecDeque<String>,
    low: VecDeque<String>,
    pending: HashMap<String, PendingTask>,
    in_flight: HashMap<String, Priority>,
    closed: bool,
}

impl QueueInner {
    fn lane(&mut self, priority: Priority) -> &mut VecDeque<String> {
        match priority {
            Priority::High => &mut self.high,
            Priority::Low => &mut self.low,
        }
    }

    fn take_next(&mut self) -> Option<SyncTask> {
        loop {
            let key = self.high.pop_front().or_else(|| self.low.pop_front())?;
            if self.in_flight.contains_key(&key) {
                // Re-laned by `complete`.
                continue;
            }
            let Some(task) = self.pending.remove(&key) else {
                continue;
            };
            self.in_flight.insert(key.clone(), task.priority);
            return Some(SyncTask {
                key,
                op: task.op,
                priority: task.priority,
            });
        }
    }

    fn is_idle(&self, include_low: bool) -> bool {
        if include_low {
            self.pending.is_empty() && self.in_flight.is_empty()
        } else {
            !self.pending.values().any(|t| t.priority == Priority::High)
                && !self.in_flight.values().any(|p| *p == Priority::High)
        }
    }
}

impl TaskQueue {
    /// Create an empty, open queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `op` for `key`, merging with a task already pending for it.
    ///
    /// The later operation wins and priority only ever goes up.
    ///
    /// # Arguments
    ///
    /// * `key` - Asset key (e.g., "sections/header.liquid")
    /// * `op` - Upload or delete
    /// * `priority` - Lane to run in
    ///
    /// # Returns
    ///
    /// `false` once the queue is closed; the task is dropped.
    pub fn push(&self, key: &str, op: SyncOp, priority: Priority) -> bool {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.closed {
            return false;
        }

        let now = Utc::now();
        let in_flight = inner.in_flight.contains_key(key);
        let relane = match inner.pending.get_mut(key) {
            Some(task) => {
                task.op = op;
                task.queued_at = now;
                let upgraded = priority > task.priority;
                if upgraded {
                    task.priority = priority;
                }
                upgraded
            }
            None => {
                inner.pending.insert(
                    key.to_string(),
                    PendingTask {
                        op,
                        priority,
                        queued_at: now,
                    },
                );
                true
            }
        };

        if relane && !in_flight {
            let priority = inner.pending[key].priority;
            inner.lane(priority).push_back(key.to_string());
            drop(guard);
            self.work.notify_one();
        }
        true
    }

    /// Take the next runnable task without waiting.
    ///
    /// The returned key is marked in flight until [`TaskQueue::complete`].
    ///
    /// # Returns
    ///
    /// `None` if nothing is runnable or the queue is closed
    pub fn try_pop(&self) -> Option<SyncTask> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return None;
        }
        inner.take_next()
    }

    /// Wait for the next task, high lane first. `None` once closed.
    pub async fn pop(&self) -> Option<SyncTask> {
        loop {
            let notified = self.work.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock();
                if inner.closed {
                    return None;
                }
                if let Some(task) = inner.take_next() {
                    let more = !inner.high.is_empty() || !inner.low.is_empty();
                    drop(inner);
                    if more {
                        self.work.notify_one();
                    }
                    return Some(task);
                }
            }

            notified.await;
        }
    }

    /// Mark `key` as in flight without a queued task, e.g. while the remote
    /// watcher writes it. Returns `false` if it is already in flight.
    pub fn claim(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.in_flight.contains_key(key) {
            return false;
        }
        inner.in_flight.insert(key.to_string(), Priority::High);
        true
    }

    /// Release `key` and re-lane anything that arrived while it was in flight.
    pub fn complete(&self, key: &str) {
        let mut inner = self.inner.lock();
        inner.in_flight.remove(key);

        let parked = inner.pending.get(key).map(|t| t.priority);
        if let Some(priority) = parked {
            if !inner.closed {
                inner.lane(priority).push_back(key.to_string());
            }
        }
        drop(inner);

        if parked.is_some() {
            self.work.notify_one();
        }
        self.idle.notify_waiters();
    }

    /// Stop handing out tasks and drop everything still pending.
    ///
    /// Returns the number of abandoned tasks. In-flight tasks are left to
    /// finish.
    pub fn close(&self) -> usize {
        let abandoned = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.high.clear();
            inner.low.clear();
            let count = inner.pending.len();
            inner.pending.clear();
            count
        };
        self.work.notify_waiters();
        self.idle.notify_waiters();
        abandoned
    }

    /// Wait until nothing high priority is pending or in flight, or until
    /// the whole queue is empty when `include_low` is set.
    pub async fn wait_idle(&self, include_low: bool) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let inner = self.inner.lock();
                if inner.closed || inner.is_idle(include_low) {
                    return;
                }
            }

            notified.await;
        }
    }

    /// Get the task waiting for `key`, if any.
    ///
    /// A task parked behind an in-flight one for the same key is included.
    pub fn pending(&self, key: &str) -> Option<PendingTask> {
        self.inner.lock().pending.get(key).cloned()
    }

    /// Check if a worker or the remote watcher currently holds `key`.
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.inner.lock().in_flight.contains_key(key)
    }

    /// Whether `key` is pending or in flight.
    pub fn contains(&self, key: &str) -> bool {
        let inner = self.inner.lock();
        inner.pending.contains_key(key) || inner.in_flight.contains_key(key)
    }

    /// Check if [`TaskQueue::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Count pending tasks per lane and in-flight keys.
    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        let pending_high = inner
            .pending
            .values()
            .filter(|t| t.priority == Priority::High)
            .count();
        QueueStats {
            pending_high,
            pending_low: inner.pending.len() - pending_high,
            in_flight: inner.in_flight.len(),
        }
    }
}
