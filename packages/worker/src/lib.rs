// ABOUTME: Execution workers: the per-job processor and the pool that feeds it from the queue
// ABOUTME: Ties the job queue, execution records and sandbox runner together

pub mod pool;
pub mod processor;

pub use pool::{WorkerPool, WorkerSettings};
pub use processor::{classify, ExecutionProcessor, ProcessError, ProcessOutcome};
