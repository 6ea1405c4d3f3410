//! Worker pool and deferred results
//!
//! A fixed set of threads pulls boxed jobs from a shared crossbeam channel.
//! Each submitted job gets its own one-shot channel for the result, wrapped
//! in a [`Deferred`]. Errors returned by a job and panics inside it both end
//! up in the handle; nothing is lost on the worker side.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{OsmError, Result};

/// Upper bound for the default pool size
pub const MAX_POOL_THREADS: usize = 32;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Result of a job that may not have finished yet
#[derive(Debug)]
pub struct Deferred<T> {
    state: State<T>,
}

#[derive(Debug)]
enum State<T> {
    Ready(Result<T>),
    Pending(Receiver<Result<T>>),
}

impl<T> Deferred<T> {
    /// Handle for a value that is already known
    pub fn ready(value: T) -> Self {
        Deferred {
            state: State::Ready(Ok(value)),
        }
    }

    /// Handle for a failure that is already known
    pub fn failed(error: OsmError) -> Self {
        Deferred {
            state: State::Ready(Err(error)),
        }
    }

    /// Block until the job finished and take its result
    pub fn wait(self) -> Result<T> {
        match self.state {
            State::Ready(result) => result,
            State::Pending(rx) => rx
                .recv()
                .map_err(|_| OsmError::ChannelClosed("deferred result"))?,
        }
    }

    /// True if `wait` would not block
    pub fn is_ready(&self) -> bool {
        match &self.state {
            State::Ready(_) => true,
            State::Pending(rx) => !rx.is_empty(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Fixed-size pool of worker threads
///
/// Shared between streams through an `Arc`. [`shutdown`](Self::shutdown)
/// (or dropping the pool) lets the workers finish the queued jobs and joins
/// them.
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    num_threads: usize,
}

impl WorkerPool {
    /// Start a pool with `num_threads` workers (at least one)
    pub fn new(num_threads: usize) -> Result<Self> {
        let num_threads = num_threads.max(1);
        let (sender, receiver) = channel::unbounded::<Job>();

        let mut workers = Vec::with_capacity(num_threads);
        for n in 0..num_threads {
            let receiver = receiver.clone();
            let worker = thread::Builder::new()
                .name(format!("osmblock-worker-{}", n))
                .spawn(move || {
                    for job in receiver.iter() {
                        job();
                    }
                })?;
            workers.push(worker);
        }

        debug!("Started worker pool with {} threads", num_threads);
        Ok(WorkerPool {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            num_threads,
        })
    }

    /// Pool sized to the machine: two cores left for the sequencing
    /// threads, between 1 and [`MAX_POOL_THREADS`] workers
    pub fn with_default_size() -> Result<Self> {
        let cores = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(cores.saturating_sub(2).clamp(1, MAX_POOL_THREADS))
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn is_running(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Run `job` on one of the workers
    pub fn submit<T, F>(&self, job: F) -> Deferred<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (tx, rx) = channel::bounded(1);
        let task: Job = Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(job)).unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                warn!("Worker job panicked: {}", message);
                Err(OsmError::WorkerPanicked(message))
            });
            // The consumer may have gone away; the result is dropped then
            let _ = tx.send(result);
        });

        let sent = match &*self.sender.lock() {
            Some(sender) => sender.send(task).is_ok(),
            None => false,
        };
        if !sent {
            return Deferred::failed(OsmError::ChannelClosed("worker pool"));
        }
        Deferred {
            state: State::Pending(rx),
        }
    }

    /// Stop accepting jobs, run the queued ones and join all workers
    pub fn shutdown(&self) {
        self.sender.lock().take();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if worker.join().is_err() {
                warn!("Worker thread exited with a panic");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.num_threads)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_results_come_back() {
        let pool = WorkerPool::new(4).unwrap();
        let handles: Vec<_> = (0..100u64).map(|i| pool.submit(move || Ok(i * i))).collect();

        let results: Vec<u64> = handles.into_iter().map(|h| h.wait().unwrap()).collect();
        assert_eq!(results, (0..100u64).map(|i| i * i).collect::<Vec<_>>());
    }

    #[test]
    fn test_errors_and_panics_are_captured() {
        let pool = WorkerPool::new(2).unwrap();

        let failed = pool.submit::<(), _>(|| Err(OsmError::Truncated("test")));
        assert!(matches!(failed.wait(), Err(OsmError::Truncated("test"))));

        let panicked = pool.submit::<(), _>(|| panic!("boom"));
        match panicked.wait() {
            Err(OsmError::WorkerPanicked(msg)) => assert_eq!(msg, "boom"),
            other => panic!("unexpected result: {:?}", other),
        }

        // The worker survives the panic
        assert_eq!(pool.submit(|| Ok(7)).wait().unwrap(), 7);
    }

    #[test]
    fn test_ready_and_failed_handles() {
        let ready = Deferred::ready(3);
        assert!(ready.is_ready());
        assert_eq!(ready.wait().unwrap(), 3);

        let failed: Deferred<i32> = Deferred::failed(OsmError::InvalidBuffer);
        assert!(matches!(failed.wait(), Err(OsmError::InvalidBuffer)));
    }

    #[test]
    fn test_shutdown_runs_queued_jobs() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new(1).unwrap();

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let counter = Arc::clone(&counter);
                pool.submit(move || {
                    thread::sleep(Duration::from_millis(2));
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        pool.shutdown();
        assert!(!pool.is_running());
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert!(handles.into_iter().all(|h| h.wait().is_ok()));

        assert!(matches!(
            pool.submit(|| Ok(1)).wait(),
            Err(OsmError::ChannelClosed(_))
        ));
    }

    #[test]
    fn test_default_size_bounds() {
        let pool = WorkerPool::with_default_size().unwrap();
        assert!(pool.num_threads() >= 1);
        assert!(pool.num_threads() <= MAX_POOL_THREADS);
    }
}
