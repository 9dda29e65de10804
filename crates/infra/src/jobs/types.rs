//! Job records and schedules.

use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of the most recent run of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Never,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Never => "NEVER",
            RunStatus::Succeeded => "SUCCEEDED",
            RunStatus::Failed => "FAILED",
        }
    }
}

impl core::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEVER" => Ok(RunStatus::Never),
            "SUCCEEDED" => Ok(RunStatus::Succeeded),
            "FAILED" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// The only scheduler state that outlives the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub name: String,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_status: RunStatus,
    pub last_error: Option<String>,
    pub runs: u64,
    pub failures: u64,
}

impl JobRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last_run_at: None,
            last_status: RunStatus::Never,
            last_error: None,
            runs: 0,
            failures: 0,
        }
    }

    pub fn record_success(&mut self, at: DateTime<Utc>) {
        self.last_run_at = Some(at);
        self.last_status = RunStatus::Succeeded;
        self.last_error = None;
        self.runs += 1;
    }

    pub fn record_failure(&mut self, at: DateTime<Utc>, error: impl Into<String>) {
        self.last_run_at = Some(at);
        self.last_status = RunStatus::Failed;
        self.last_error = Some(error.into());
        self.runs += 1;
        self.failures += 1;
    }
}

/// When a job wants to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Fixed interval since the last run.
    Every(Duration),
    /// Once per UTC day, at or after `hour:00`.
    DailyAt { hour: u32 },
}

impl Schedule {
    /// Whether a job last run at `last_run` is due at `now`. A job that never ran
    /// is due as soon as its window opens.
    pub fn is_due(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match *self {
            Schedule::Every(interval) => match last_run {
                None => true,
                Some(last) => chrono::Duration::from_std(interval)
                    .is_ok_and(|interval| now - last >= interval),
            },
            Schedule::DailyAt { hour } => {
                let Some(at) = NaiveTime::from_hms_opt(hour.min(23), 0, 0) else {
                    return false;
                };
                let window_opens = now.date_naive().and_time(at).and_utc();
                now >= window_opens && last_run.is_none_or(|last| last < window_opens)
            }
        }
    }

    /// How long the scheduler thread sleeps between due checks.
    pub fn tick(&self) -> Duration {
        match *self {
            Schedule::Every(interval) => interval,
            Schedule::DailyAt { .. } => Duration::from_secs(60),
        }
    }
}
