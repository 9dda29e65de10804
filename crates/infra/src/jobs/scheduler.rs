//! Timer-driven scheduler: one thread per registered job.

use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::mutation::MutationError;
use crate::store::StoreError;

use super::store::{JobRecordStore, JobStoreError};
use super::types::{JobRecord, Schedule};

/// A periodic unit of background work.
pub trait ScheduledJob: Send + Sync {
    /// Stable name; keys the persisted [`JobRecord`].
    fn name(&self) -> &str;

    fn schedule(&self) -> Schedule;

    /// Do one run. The returned summary is logged.
    fn run(&self, now: DateTime<Utc>) -> Result<String, JobError>;
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Mutation(#[from] MutationError),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRun {
    pub name: String,
    pub outcome: Result<String, String>,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Thread name prefix.
    pub name: String,
    /// Upper bound on the sleep between due checks.
    pub max_tick: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: "stock-jobs".to_string(),
            max_tick: Duration::from_secs(60),
        }
    }
}

/// Scheduler runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SchedulerStats {
    pub runs_succeeded: u64,
    pub runs_failed: u64,
    pub record_errors: u64,
    pub uptime_secs: u64,
}

/// Handle to control running job threads.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: Vec<mpsc::Sender<()>>,
    joins: Vec<thread::JoinHandle<()>>,
    stats: Arc<Mutex<SchedulerStats>>,
    started: Instant,
}

impl SchedulerHandle {
    /// Stop every job thread and wait for in-flight runs to finish.
    pub fn shutdown(self) {
        for tx in &self.shutdown {
            let _ = tx.send(());
        }
        for join in self.joins {
            let _ = join.join();
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        let mut stats = self
            .stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }
}

pub struct JobScheduler {
    records: Arc<dyn JobRecordStore>,
    jobs: Vec<Arc<dyn ScheduledJob>>,
}

impl JobScheduler {
    pub fn new<R: JobRecordStore + 'static>(records: R) -> Self {
        Self {
            records: Arc::new(records),
            jobs: Vec::new(),
        }
    }

    pub fn register<J: ScheduledJob + 'static>(&mut self, job: J) -> &mut Self {
        self.jobs.push(Arc::new(job));
        self
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.name()).collect()
    }

    /// Run every job that is due at `now`, sequentially on the calling thread.
    pub fn run_due(&self, now: DateTime<Utc>) -> Result<Vec<JobRun>, JobStoreError> {
        let mut runs = Vec::new();
        for job in &self.jobs {
            if let Some(run) = run_if_due(self.records.as_ref(), job.as_ref(), now)? {
                runs.push(run);
            }
        }
        Ok(runs)
    }

    /// Start one thread per job. Each thread checks its schedule, runs when due and
    /// sleeps until its next tick or shutdown.
    pub fn spawn(self, config: SchedulerConfig) -> std::io::Result<SchedulerHandle> {
        let stats = Arc::new(Mutex::new(SchedulerStats::default()));
        let mut shutdown = Vec::with_capacity(self.jobs.len());
        let mut joins = Vec::with_capacity(self.jobs.len());

        for job in self.jobs {
            let (tx, rx) = mpsc::channel::<()>();
            let records = Arc::clone(&self.records);
            let stats = Arc::clone(&stats);
            let tick = job.schedule().tick().min(config.max_tick);
            let thread_name = format!("{}-{}", config.name, job.name());

            let join = thread::Builder::new()
                .name(thread_name)
                .spawn(move || job_loop(records, job, tick, rx, stats))?;

            shutdown.push(tx);
            joins.push(join);
        }

        Ok(SchedulerHandle {
            shutdown,
            joins,
            stats,
            started: Instant::now(),
        })
    }
}

fn job_loop(
    records: Arc<dyn JobRecordStore>,
    job: Arc<dyn ScheduledJob>,
    tick: Duration,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<SchedulerStats>>,
) {
    info!(job = job.name(), tick_ms = tick.as_millis() as u64, "job thread started");

    loop {
        match run_if_due(records.as_ref(), job.as_ref(), Utc::now()) {
            Ok(Some(run)) => {
                if let Ok(mut s) = stats.lock() {
                    match run.outcome {
                        Ok(_) => s.runs_succeeded += 1,
                        Err(_) => s.runs_failed += 1,
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                error!(job = job.name(), error = %e, "job record unavailable");
                if let Ok(mut s) = stats.lock() {
                    s.record_errors += 1;
                }
            }
        }

        match shutdown_rx.recv_timeout(tick) {
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    info!(job = job.name(), "job thread stopped");
}

fn run_if_due(
    records: &dyn JobRecordStore,
    job: &dyn ScheduledJob,
    now: DateTime<Utc>,
) -> Result<Option<JobRun>, JobStoreError> {
    let mut record = records
        .load(job.name())?
        .unwrap_or_else(|| JobRecord::new(job.name()));

    if !job.schedule().is_due(record.last_run_at, now) {
        return Ok(None);
    }

    let outcome = match job.run(now) {
        Ok(summary) => {
            debug!(job = job.name(), summary = %summary, "job run succeeded");
            record.record_success(now);
            Ok(summary)
        }
        Err(e) => {
            warn!(job = job.name(), error = %e, failures = record.failures + 1, "job run failed");
            record.record_failure(now, e.to_string());
            Err(e.to_string())
        }
    };
    records.save(&record)?;

    Ok(Some(JobRun {
        name: job.name().to_string(),
        outcome,
    }))
}
