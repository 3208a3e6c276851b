//! Job Scheduler
//!
//! A single owned scheduler that fires callbacks at absolute instants in a
//! fixed timezone, with misfire and coalescing policy.

mod dispatcher;
mod job;

pub use dispatcher::{Scheduler, SchedulerConfig};
pub use job::{FireAt, Job, JobEvent, JobOptions, JobState, JobTarget};
