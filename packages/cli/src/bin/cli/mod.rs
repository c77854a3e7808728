pub mod executions;
pub mod queue;
pub mod sessions;
pub mod utils;
pub mod worker;
