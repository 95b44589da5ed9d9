//! Asynchronous job execution: worker pool, live process tracking, batch
//! orchestration and result aggregation.

pub mod orchestrator;
pub mod process;
pub mod result;
pub mod scheduler;

pub use orchestrator::{BatchOrchestrator, ImportJob};
pub use process::{ExpiryPolicy, ImportProcess, ProcessRegistry, ProcessState, TrackedProcess};
pub use result::{BatchTally, ImportResult};
pub use scheduler::{ImportPermit, ImportScheduler};
