//! Background job scheduling.
//!
//! ## Design
//!
//! - Each job is an independent, timer-driven routine on its own thread
//! - A failed run is logged, recorded and retried at the next tick
//! - The only persisted state is one `JobRecord` per job
//!
//! ## Components
//!
//! - `ScheduledJob`: a named unit of work with a `Schedule`
//! - `JobRecordStore`: persistence for job records (in-memory or Postgres)
//! - `JobScheduler`: runs due jobs, either inline (`run_due`) or on threads (`spawn`)

pub mod scheduler;
pub mod store;
pub mod types;

pub use scheduler::{
    JobError, JobRun, JobScheduler, ScheduledJob, SchedulerConfig, SchedulerHandle, SchedulerStats,
};
pub use store::{InMemoryJobRecordStore, JobRecordStore, JobStoreError};
pub use types::{JobRecord, RunStatus, Schedule};
