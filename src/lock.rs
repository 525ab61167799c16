//! Pessimistic FIFO lock manager
//!
//! One lock per resource (a table name), shared/exclusive, granted in
//! request order with writer fairness: a shared request queued behind an
//! earlier exclusive request must wait for that exclusive request too, even
//! if the current holders would otherwise allow it in (`SPEC_FULL.md` §4.4).
//! Waiters poll every [`POLL_INTERVAL`] rather than using a condvar, mirroring
//! the teacher's `FsyncState` wait-loop shape.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use log::trace;

use crate::error::{Error, Result};

/// Cadence at which a blocked `request_and_wait` call re-checks whether its
/// request can be granted.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Shared,
    Exclusive,
}

#[derive(Debug, Clone)]
struct PendingRequest {
    transaction_id: String,
    kind: LockKind,
    granted: bool,
}

#[derive(Debug, Default)]
struct ResourceQueue {
    queue: VecDeque<PendingRequest>,
}

impl ResourceQueue {
    /// Recompute which queued requests are currently grantable, per
    /// `SPEC_FULL.md` §4.4's grant rules: an exclusive request is grantable
    /// iff nothing else anywhere in the queue is already granted; a shared
    /// request is grantable iff no exclusive request is granted anywhere
    /// and no exclusive request appears strictly before it. The latter
    /// check is by *position*, not by grant status — a not-yet-granted
    /// exclusive request still blocks later shared requests, which is what
    /// gives writers FIFO fairness against a stream of later readers.
    fn recompute_grants(&mut self) {
        let mut any_granted = false;
        let mut exclusive_before = false;
        for request in self.queue.iter_mut() {
            request.granted = match request.kind {
                LockKind::Exclusive => !any_granted,
                LockKind::Shared => !exclusive_before,
            };
            if request.granted {
                any_granted = true;
            }
            if request.kind == LockKind::Exclusive {
                exclusive_before = true;
            }
        }
    }

    fn is_granted(&self, transaction_id: &str) -> bool {
        self.queue
            .iter()
            .find(|r| r.transaction_id == transaction_id)
            .map(|r| r.granted)
            .unwrap_or(false)
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// A snapshot of one resource's wait queue, for diagnostics
/// (`GetLockQueueSnapshot`, `SPEC_FULL.md` §4.4).
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub transaction_id: String,
    pub kind: LockKind,
    pub granted: bool,
}

struct Inner {
    resources: Mutex<std::collections::HashMap<String, ResourceQueue>>,
    condvar: Condvar,
    poll_interval: Duration,
}

/// FIFO shared/exclusive lock manager, one instance per `TransactionManager`.
#[derive(Clone)]
pub struct LockManager {
    inner: Arc<Inner>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::with_poll_interval(POLL_INTERVAL)
    }

    /// Build a manager with a non-default poll cadence, per
    /// `Config::lock_poll_interval` (`SPEC_FULL.md` §3, §5).
    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                resources: Mutex::new(std::collections::HashMap::new()),
                condvar: Condvar::new(),
                poll_interval,
            }),
        }
    }

    /// Enqueue a lock request and block until it is granted or `timeout`
    /// elapses. Returns `Error::LockTimeout` on expiry; the request is
    /// removed from the queue before returning in that case so it does not
    /// linger and block later requests.
    pub fn request_and_wait(
        &self,
        resource_id: &str,
        transaction_id: &str,
        kind: LockKind,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        {
            let mut resources = self.inner.resources.lock().unwrap();
            let queue = resources.entry(resource_id.to_string()).or_default();
            queue.queue.push_back(PendingRequest {
                transaction_id: transaction_id.to_string(),
                kind,
                granted: false,
            });
            queue.recompute_grants();
        }

        loop {
            {
                let resources = self.inner.resources.lock().unwrap();
                if let Some(queue) = resources.get(resource_id) {
                    if queue.is_granted(transaction_id) {
                        trace!("granted {:?} lock on '{}' to {}", kind, resource_id, transaction_id);
                        return Ok(());
                    }
                }
            }

            if Instant::now() >= deadline {
                let mut resources = self.inner.resources.lock().unwrap();
                if let Some(queue) = resources.get_mut(resource_id) {
                    queue
                        .queue
                        .retain(|r| r.transaction_id != transaction_id);
                    queue.recompute_grants();
                }
                self.inner.condvar.notify_all();
                return Err(Error::lock_timeout(resource_id));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let wait_for = remaining.min(self.inner.poll_interval);
            let guard = self.inner.resources.lock().unwrap();
            let _ = self.inner.condvar.wait_timeout(guard, wait_for).unwrap();
        }
    }

    /// Release every lock held by `transaction_id` on `resource_id`. A
    /// no-op if the transaction holds no such lock.
    pub fn release_lock(&self, resource_id: &str, transaction_id: &str) {
        let mut resources = self.inner.resources.lock().unwrap();
        if let Some(queue) = resources.get_mut(resource_id) {
            queue
                .queue
                .retain(|r| r.transaction_id != transaction_id);
            queue.recompute_grants();
            if queue.is_empty() {
                resources.remove(resource_id);
            }
        }
        drop(resources);
        self.inner.condvar.notify_all();
    }

    /// Release every lock held by `transaction_id` across all resources.
    pub fn release_all(&self, transaction_id: &str) {
        let mut resources = self.inner.resources.lock().unwrap();
        let mut emptied = Vec::new();
        for (resource_id, queue) in resources.iter_mut() {
            queue
                .queue
                .retain(|r| r.transaction_id != transaction_id);
            queue.recompute_grants();
            if queue.is_empty() {
                emptied.push(resource_id.clone());
            }
        }
        for resource_id in emptied {
            resources.remove(&resource_id);
        }
        drop(resources);
        self.inner.condvar.notify_all();
    }

    /// A point-in-time snapshot of a resource's wait queue, for diagnostics.
    pub fn get_lock_queue_snapshot(&self, resource_id: &str) -> Vec<QueueEntry> {
        let resources = self.inner.resources.lock().unwrap();
        resources
            .get(resource_id)
            .map(|queue| {
                queue
                    .queue
                    .iter()
                    .map(|r| QueueEntry {
                        transaction_id: r.transaction_id.clone(),
                        kind: r.kind,
                        granted: r.granted,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn two_shared_locks_are_both_granted_immediately() {
        let manager = LockManager::new();
        manager
            .request_and_wait("t", "tx1", LockKind::Shared, Duration::from_millis(100))
            .unwrap();
        manager
            .request_and_wait("t", "tx2", LockKind::Shared, Duration::from_millis(100))
            .unwrap();
    }

    #[test]
    fn exclusive_lock_blocks_subsequent_shared_request() {
        let manager = LockManager::new();
        manager
            .request_and_wait("t", "tx1", LockKind::Exclusive, Duration::from_millis(100))
            .unwrap();

        let err = manager
            .request_and_wait("t", "tx2", LockKind::Shared, Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, Error::LockTimeout(_)));
    }

    #[test]
    fn shared_lock_blocks_subsequent_exclusive_request() {
        let manager = LockManager::new();
        manager
            .request_and_wait("t", "tx1", LockKind::Shared, Duration::from_millis(100))
            .unwrap();

        let err = manager
            .request_and_wait("t", "tx2", LockKind::Exclusive, Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, Error::LockTimeout(_)));
    }

    #[test]
    fn releasing_exclusive_lock_unblocks_waiter() {
        let manager = LockManager::new();
        manager
            .request_and_wait("t", "tx1", LockKind::Exclusive, Duration::from_millis(100))
            .unwrap();

        let manager2 = manager.clone();
        let handle = thread::spawn(move || {
            manager2.request_and_wait("t", "tx2", LockKind::Shared, Duration::from_secs(2))
        });

        thread::sleep(Duration::from_millis(30));
        manager.release_lock("t", "tx1");

        assert!(handle.join().unwrap().is_ok());
    }

    #[test]
    fn writer_is_not_starved_by_later_readers() {
        let manager = LockManager::new();
        manager
            .request_and_wait("t", "reader1", LockKind::Shared, Duration::from_millis(100))
            .unwrap();

        let manager2 = manager.clone();
        let writer = thread::spawn(move || {
            manager2.request_and_wait(
                "t",
                "writer",
                LockKind::Exclusive,
                Duration::from_secs(2),
            )
        });
        // Give the writer request time to enqueue behind reader1.
        thread::sleep(Duration::from_millis(20));

        // A shared request arriving after the writer must wait behind it.
        let err = manager
            .request_and_wait("t", "reader2", LockKind::Shared, Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, Error::LockTimeout(_)));

        manager.release_lock("t", "reader1");
        assert!(writer.join().unwrap().is_ok());
    }

    #[test]
    fn release_all_clears_every_resource_for_a_transaction() {
        let manager = LockManager::new();
        manager
            .request_and_wait("a", "tx1", LockKind::Exclusive, Duration::from_millis(100))
            .unwrap();
        manager
            .request_and_wait("b", "tx1", LockKind::Exclusive, Duration::from_millis(100))
            .unwrap();

        manager.release_all("tx1");

        assert!(manager.get_lock_queue_snapshot("a").is_empty());
        assert!(manager.get_lock_queue_snapshot("b").is_empty());
    }
}
