//! Small bounded worker pool.
//!
//! A fixed number of tokio tasks drain a shared queue. When the queue is
//! full the oldest pending job is discarded to admit the new one, so a burst
//! on the radio never blocks the receive loop or a sender.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// A unit of pool work.
pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct Shared {
    queue: Mutex<VecDeque<Job>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, VecDeque<Job>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bounded pool with discard-oldest backpressure.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("capacity", &self.shared.capacity)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

/// What happened to a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submit {
    /// Queued.
    Queued,
    /// Queued after discarding the oldest pending job.
    DiscardedOldest,
    /// The pool is shut down; the job was dropped.
    Closed,
}

impl WorkerPool {
    /// Spawn `workers` tasks sharing a queue of `capacity` jobs.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(workers: usize, capacity: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        });
        let handles = (0..workers.max(1))
            .map(|_| tokio::spawn(worker_loop(Arc::clone(&shared))))
            .collect();
        Self {
            shared,
            workers: Mutex::new(handles),
        }
    }

    /// Queue a job without waiting.
    pub fn submit<F>(&self, job: F) -> Submit
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.shared.closed.load(Ordering::Acquire) {
            return Submit::Closed;
        }
        let outcome = {
            let mut queue = self.shared.queue();
            let outcome = if queue.len() >= self.shared.capacity {
                queue.pop_front();
                Submit::DiscardedOldest
            } else {
                Submit::Queued
            };
            queue.push_back(Box::pin(job));
            outcome
        };
        self.shared.notify.notify_one();
        outcome
    }

    /// Jobs waiting for a worker.
    pub fn pending(&self) -> usize {
        self.shared.queue().len()
    }

    /// Drop pending jobs and cancel running ones.
    pub fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.queue().clear();
        self.shared.notify.notify_waiters();
        let handles = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            handle.abort();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn worker_loop(shared: Arc<Shared>) {
    loop {
        let notified = shared.notify.notified();
        if shared.closed.load(Ordering::Acquire) {
            break;
        }
        let job = shared.queue().pop_front();
        match job {
            Some(job) => job.await,
            None => notified.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn runs_submitted_jobs() {
        let pool = WorkerPool::spawn(2, 10);
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let count = Arc::clone(&count);
            assert_eq!(
                pool.submit(async move {
                    count.fetch_add(1, Ordering::SeqCst);
                }),
                Submit::Queued
            );
        }

        tokio::time::timeout(Duration::from_secs(2), async {
            while count.load(Ordering::SeqCst) < 5 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("jobs should run");
    }

    #[tokio::test]
    async fn full_queue_discards_oldest() {
        let pool = WorkerPool::spawn(1, 2);

        // Occupy the only worker.
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (started_tx, started_rx) = oneshot::channel::<()>();
        pool.submit(async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
        });
        started_rx.await.unwrap();

        let ran = Arc::new(Mutex::new(Vec::new()));
        let mut outcomes = Vec::new();
        for i in 0..3 {
            let ran = Arc::clone(&ran);
            outcomes.push(pool.submit(async move {
                ran.lock().unwrap().push(i);
            }));
        }
        assert_eq!(
            outcomes,
            vec![Submit::Queued, Submit::Queued, Submit::DiscardedOldest]
        );

        release_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while ran.lock().unwrap().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("remaining jobs should run");
        assert_eq!(*ran.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn closed_pool_rejects_jobs() {
        let pool = WorkerPool::spawn(1, 4);
        pool.shutdown();
        assert_eq!(pool.submit(async {}), Submit::Closed);
        assert_eq!(pool.pending(), 0);
    }
}
