//! Scheduling components: worker pool, frontier tracking, the range and job dispatchers, and
//! the stop signal that controls them.

pub mod control;
pub mod frontier;
pub mod jobs;
pub mod pool;
pub mod range;

pub use control::StopHandle;
pub use frontier::{Advance, Frontier};
pub use jobs::{Aggregator, JobDispatcher, job_request};
pub use pool::{Completion, SlotEvent, WorkerPool};
pub use range::{RangeDispatcher, autosave_interval, effective_concurrency};
