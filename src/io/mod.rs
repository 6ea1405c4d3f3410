//! Threaded PBF input and output
//!
//! Both directions share a [`WorkerPool`](crate::thread::WorkerPool) passed
//! in by the caller and run one sequencing thread per stream.

pub mod input;
pub mod output;

pub use input::PbfInput;
pub use output::PbfOutput;
