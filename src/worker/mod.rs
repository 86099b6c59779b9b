// Worker pool - fixed OS threads that run blocking engine calls off the async caller

mod channel;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::error::DispatchError;

use channel::{Command, Job, JobQueue};

/// Fixed-capacity pool of worker threads.
///
/// Each thread runs one submitted closure at a time; excess submissions wait in a FIFO
/// queue. The pool knows nothing about engines.
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Command>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    capacity: usize,
    active: Arc<AtomicUsize>,
    shutdown: AtomicBool,
}

impl WorkerPool {
    /// Spawn `capacity` worker threads.
    ///
    /// # Errors
    /// Returns `DispatchError::ConfigError` when `capacity` is zero, or
    /// `DispatchError::ResourceError` if a thread cannot be spawned.
    pub fn new(capacity: usize) -> Result<Self, DispatchError> {
        if capacity < 1 {
            return Err(DispatchError::ConfigError(
                "worker pool capacity must be at least 1".into(),
            ));
        }

        let (sender, queue) = JobQueue::new();
        let active = Arc::new(AtomicUsize::new(0));
        // Let blocking jobs use tokio APIs (e.g. `Handle::current`) when built inside a runtime.
        let handle = Handle::try_current().ok();
        let mut workers = Vec::with_capacity(capacity);
        for n in 0..capacity {
            let queue = queue.clone();
            let active = Arc::clone(&active);
            let handle = handle.clone();
            let spawned = thread::Builder::new()
                .name(format!("dispatch-worker-{n}"))
                .spawn(move || {
                    let runtime_guard = handle.as_ref().map(Handle::enter);
                    run_worker(&queue, &active);
                    drop(runtime_guard);
                });
            match spawned {
                Ok(join) => workers.push(join),
                Err(err) => {
                    // stop the threads already running before reporting
                    drop(sender);
                    for join in workers {
                        let _ = join.join();
                    }
                    return Err(DispatchError::ResourceError(format!(
                        "failed to spawn worker thread: {err}"
                    )));
                }
            }
        }

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            capacity,
            active,
            shutdown: AtomicBool::new(false),
        })
    }

    /// Queue `func` for a worker thread and return the receiver for its result.
    ///
    /// # Errors
    /// Returns `DispatchError::ResourceError` after [`shutdown`](WorkerPool::shutdown).
    pub fn submit<F, R>(&self, func: F) -> Result<oneshot::Receiver<R>, DispatchError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            // the caller may have stopped waiting
            let _ = tx.send(func());
        });
        let guard = lock(&self.sender);
        let sender = guard
            .as_ref()
            .ok_or_else(|| DispatchError::closed("worker pool"))?;
        sender
            .send(Command::Run(job))
            .map_err(|_| DispatchError::closed("worker pool"))?;
        Ok(rx)
    }

    /// Stop accepting work. With `wait`, run everything already queued and join every
    /// thread before returning. Later calls do nothing.
    pub fn shutdown(&self, wait: bool) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let sender = lock(&self.sender).take();
        if let Some(sender) = sender {
            // one marker per worker, behind every queued job
            for _ in 0..self.capacity {
                let _ = sender.send(Command::Shutdown);
            }
        }
        let workers = std::mem::take(&mut *lock(&self.workers));
        if !wait {
            return;
        }
        let current = thread::current().id();
        for join in workers {
            if join.thread().id() == current {
                // shutdown from inside a job; that worker exits on its own
                continue;
            }
            if join.join().is_err() {
                tracing::warn!("worker thread exited by panic");
            }
        }
        tracing::debug!(capacity = self.capacity, "worker pool drained");
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs currently executing.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown(true);
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("capacity", &self.capacity)
            .field("active", &self.active())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

fn run_worker(queue: &JobQueue, active: &AtomicUsize) {
    while let Some(command) = queue.next() {
        match command {
            Command::Shutdown => break,
            Command::Run(job) => {
                active.fetch_add(1, Ordering::AcqRel);
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    tracing::warn!("worker job panicked");
                }
                active.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::time::Duration;

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(
            WorkerPool::new(0),
            Err(DispatchError::ConfigError(_))
        ));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn submit_returns_the_closure_result() {
        let pool = WorkerPool::new(2).unwrap();
        let rx = pool.submit(|| 21 * 2).unwrap();
        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn runs_capacity_jobs_at_once() {
        let pool = WorkerPool::new(3).unwrap();
        let barrier = Arc::new(Barrier::new(3));
        let receivers: Vec<_> = (0..3)
            .map(|i| {
                let barrier = Arc::clone(&barrier);
                // deadlocks unless all three run concurrently
                pool.submit(move || {
                    barrier.wait();
                    i
                })
                .unwrap()
            })
            .collect();
        let mut results = Vec::new();
        for rx in receivers {
            results.push(rx.await.unwrap());
        }
        assert_eq!(results, vec![0, 1, 2]);
    }

    #[test]
    fn shutdown_drains_queued_jobs() {
        let pool = WorkerPool::new(1).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let done = Arc::clone(&done);
            let _rx = pool
                .submit(move || {
                    std::thread::sleep(Duration::from_millis(5));
                    done.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        pool.shutdown(true);
        assert_eq!(done.load(Ordering::SeqCst), 5);
        assert!(pool.is_shutdown());
        assert!(matches!(
            pool.submit(|| ()),
            Err(DispatchError::ResourceError(_))
        ));
        pool.shutdown(true);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn panicking_job_does_not_kill_the_worker() {
        let pool = WorkerPool::new(1).unwrap();
        let rx = pool.submit(|| -> u8 { panic!("boom") }).unwrap();
        assert!(rx.await.is_err());
        let rx = pool.submit(|| 7).unwrap();
        assert_eq!(rx.await.unwrap(), 7);
    }
}
