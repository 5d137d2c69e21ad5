//! §4.B Task queue — rate-limited, deduplicated FIFO of `(kind, key)` tasks.
//!
//! Follows the classic workqueue algorithm (as used by client-go's
//! `workqueue.Interface`, which the source this spec was distilled from
//! relies on): a `dirty` set coalesces duplicate adds before the worker
//! observes them, and a `processing` set defers re-delivery of an item that
//! is re-added while the single worker is still handling its previous
//! delivery, so that a rapid add+update+delete for one key collapses into
//! exactly one sync call (§8 P7) while still guaranteeing the worker sees
//! the most recent state.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{error, warn};

use crate::key::Key;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Ingress,
    Endpoints,
    Service,
    ConfigMap,
    Secret,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Task {
    pub kind: TaskKind,
    pub key: Key,
}

impl Task {
    pub fn new(kind: TaskKind, key: Key) -> Self {
        Self { kind, key }
    }
}

struct Inner {
    queue: VecDeque<Task>,
    dirty: HashSet<Task>,
    processing: HashSet<Task>,
    shutting_down: bool,
}

/// Single-producer(multiple)/single-consumer task queue. Safe to enqueue
/// from any thread; intended to be drained by exactly one worker loop
/// (§5 "the task queue has exactly one worker thread").
pub struct TaskQueue {
    inner: std::sync::Mutex<Inner>,
    notify: Notify,
}

impl TaskQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: std::sync::Mutex::new(Inner {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
        })
    }

    /// Idempotent enqueue: duplicates coalesce before the worker observes
    /// them (§4.B).
    pub fn enqueue(&self, task: Task) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if inner.shutting_down {
            return;
        }
        if inner.dirty.contains(&task) {
            return;
        }
        inner.dirty.insert(task.clone());
        if inner.processing.contains(&task) {
            // Already being handled; it'll be re-queued when `done` runs.
            return;
        }
        inner.queue.push_back(task);
        drop(inner);
        self.notify.notify_one();
    }

    /// Re-enqueue after a handler error, logging as §4.B specifies.
    pub fn requeue(&self, task: Task, err: &dyn std::error::Error) {
        error!(kind = ?task.kind, key = %task.key, error = %err, "requeue after error");
        self.enqueue(task);
    }

    /// Schedules a re-enqueue after `delay` without blocking the worker
    /// (§4.B "delayed requeue"). Used by the reconciler when a minion's
    /// master has not yet arrived (§4.D, §7's 5s delayed-requeue rule).
    pub fn enqueue_after(self: &Arc<Self>, task: Task, delay: Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(task);
        });
    }

    /// Blocks (cooperatively) until a task is available or the queue shuts
    /// down. Marks the task `processing` so a concurrent re-add is deferred
    /// rather than lost.
    pub async fn next(&self) -> Option<Task> {
        loop {
            {
                let mut inner = self.inner.lock().expect("queue lock poisoned");
                if let Some(task) = inner.queue.pop_front() {
                    inner.dirty.remove(&task);
                    inner.processing.insert(task.clone());
                    return Some(task);
                }
                if inner.shutting_down {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Marks a task's processing as finished. If it was re-added while in
    /// flight, it is pushed back onto the queue now (FIFO-per-key, most
    /// recent event wins).
    pub fn done(&self, task: &Task) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner.processing.remove(task);
        if inner.dirty.contains(task) {
            inner.queue.push_back(task.clone());
            drop(inner);
            self.notify.notify_one();
        }
    }

    /// Drains the in-flight item then signals completion to callers of
    /// `next` (§4.B "Shutdown drains the worker's in-flight item").
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner.shutting_down = true;
        drop(inner);
        self.notify.notify_waiters();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }
}

pub fn warn_dropped(task: &Task, reason: &str) {
    warn!(kind = ?task.kind, key = %task.key, reason, "task dropped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(name: &str) -> Task {
        Task::new(TaskKind::Ingress, Key::new("default", name))
    }

    #[tokio::test]
    async fn coalesces_duplicate_adds_before_dequeue() {
        let q = TaskQueue::new();
        q.enqueue(t("cafe"));
        q.enqueue(t("cafe"));
        q.enqueue(t("cafe"));
        assert_eq!(q.len(), 1);
        let got = q.next().await.unwrap();
        assert_eq!(got, t("cafe"));
        q.done(&got);
        assert_eq!(q.len(), 0);
    }

    #[tokio::test]
    async fn readd_while_processing_is_redelivered_after_done() {
        let q = TaskQueue::new();
        q.enqueue(t("cafe"));
        let got = q.next().await.unwrap();
        // A second event for the same key arrives while the worker still
        // holds the first delivery.
        q.enqueue(t("cafe"));
        assert_eq!(q.len(), 0, "redelivery must wait for done()");
        q.done(&got);
        assert_eq!(q.len(), 1, "dirty item requeued once processing finished");
    }

    #[tokio::test]
    async fn fifo_across_distinct_keys() {
        let q = TaskQueue::new();
        q.enqueue(t("a"));
        q.enqueue(t("b"));
        assert_eq!(q.next().await.unwrap(), t("a"));
        assert_eq!(q.next().await.unwrap(), t("b"));
    }

    #[tokio::test]
    async fn shutdown_unblocks_next() {
        let q = TaskQueue::new();
        q.shutdown();
        assert!(q.next().await.is_none());
    }
}
