//! Threading primitives for the I/O pipeline

pub mod pool;
pub mod queue;

pub use pool::{Deferred, WorkerPool, MAX_POOL_THREADS};
pub use queue::{deferred_queue, QueueReceiver, QueueSender};
