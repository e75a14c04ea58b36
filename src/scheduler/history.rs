//! Execution history tracking for pipeline runs.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

/// Lifecycle of a single execution: `pending -> running -> terminal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::TimedOut => "timed_out",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded | ExecutionStatus::Failed | ExecutionStatus::TimedOut
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "succeeded" => Ok(ExecutionStatus::Succeeded),
            "failed" => Ok(ExecutionStatus::Failed),
            "timed_out" => Ok(ExecutionStatus::TimedOut),
            other => Err(format!("unknown execution status '{other}'")),
        }
    }
}

/// What started an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Scheduled,
    Manual,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::Scheduled => "scheduled",
            Trigger::Manual => "manual",
        }
    }
}

impl FromStr for Trigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Trigger::Scheduled),
            "manual" => Ok(Trigger::Manual),
            other => Err(format!("unknown trigger '{other}'")),
        }
    }
}

/// A finalized execution. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub job_id: String,
    pub trigger: Trigger,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub critical: bool,
    pub result_summary: Option<String>,
}

impl ExecutionRecord {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Succeeded
    }
}

/// An admitted execution that has not finished yet.
///
/// Each finishing method consumes the value, so a run is finalized exactly once.
#[derive(Debug)]
pub struct RunningExecution {
    execution_id: String,
    job_id: String,
    trigger: Trigger,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl RunningExecution {
    pub fn start(execution_id: String, job_id: &str, trigger: Trigger, started_at: DateTime<Utc>) -> Self {
        Self {
            execution_id,
            job_id: job_id.to_string(),
            trigger,
            started_at,
            started: Instant::now(),
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn succeed(self, result_summary: Option<String>) -> ExecutionRecord {
        self.finish(ExecutionStatus::Succeeded, None, false, result_summary)
    }

    pub fn fail(self, message: String, critical: bool) -> ExecutionRecord {
        self.finish(ExecutionStatus::Failed, Some(message), critical, None)
    }

    pub fn time_out(self, timeout: Duration) -> ExecutionRecord {
        let message = format!("timed out after {}s", timeout.as_secs_f64());
        self.finish(ExecutionStatus::TimedOut, Some(message), false, None)
    }

    fn finish(
        self,
        status: ExecutionStatus,
        error: Option<String>,
        critical: bool,
        result_summary: Option<String>,
    ) -> ExecutionRecord {
        ExecutionRecord {
            duration_ms: self.started.elapsed().as_millis() as u64,
            execution_id: self.execution_id,
            job_id: self.job_id,
            trigger: self.trigger,
            status,
            started_at: self.started_at,
            error,
            critical,
            result_summary,
        }
    }
}

/// Bounded in-memory log of finished executions, oldest first.
///
/// The persistence sink keeps the full history; this only backs recent-window
/// health checks and cheap local inspection.
#[derive(Debug)]
pub struct ExecutionLog {
    entries: VecDeque<ExecutionRecord>,
    limit: usize,
}

impl ExecutionLog {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit.min(1024)),
            limit: limit.max(1),
        }
    }

    pub fn push(&mut self, record: ExecutionRecord) {
        if self.entries.len() == self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The last `n` records, newest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &ExecutionRecord> {
        self.entries.iter().rev().take(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, status: ExecutionStatus) -> ExecutionRecord {
        ExecutionRecord {
            execution_id: id.to_string(),
            job_id: "job".to_string(),
            trigger: Trigger::Scheduled,
            status,
            started_at: Utc::now(),
            duration_ms: 1,
            error: None,
            critical: false,
            result_summary: None,
        }
    }

    #[test]
    fn test_status_strings_round_trip() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Succeeded,
            ExecutionStatus::Failed,
            ExecutionStatus::TimedOut,
        ] {
            assert_eq!(status.as_str().parse::<ExecutionStatus>().unwrap(), status);
        }
        assert!("done".parse::<ExecutionStatus>().is_err());
    }

    #[test]
    fn test_only_finished_states_are_terminal() {
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::TimedOut.is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_execution_measures_duration() {
        let run = RunningExecution::start("a-1".into(), "a", Trigger::Manual, Utc::now());
        tokio::time::sleep(Duration::from_millis(250)).await;
        let rec = run.fail("ECONNREFUSED".into(), true);
        assert_eq!(rec.status, ExecutionStatus::Failed);
        assert_eq!(rec.duration_ms, 250);
        assert!(rec.critical);
        assert_eq!(rec.trigger, Trigger::Manual);
    }

    #[test]
    fn test_timeout_record_carries_message() {
        let run = RunningExecution::start("a-2".into(), "a", Trigger::Scheduled, Utc::now());
        let rec = run.time_out(Duration::from_secs(5));
        assert_eq!(rec.status, ExecutionStatus::TimedOut);
        assert_eq!(rec.error.as_deref(), Some("timed out after 5s"));
        assert!(!rec.critical);
    }

    #[test]
    fn test_log_drops_oldest_beyond_limit() {
        let mut log = ExecutionLog::new(2);
        log.push(record("1", ExecutionStatus::Succeeded));
        log.push(record("2", ExecutionStatus::Failed));
        log.push(record("3", ExecutionStatus::Succeeded));
        assert_eq!(log.len(), 2);
        let ids: Vec<&str> = log.recent(5).map(|r| r.execution_id.as_str()).collect();
        assert_eq!(ids, vec!["3", "2"]);
    }
}
