//! Aggregate counters and the health snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::history::{ExecutionRecord, ExecutionStatus};

/// Coarse health label shown on dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLabel {
    #[default]
    Healthy,
    Warning,
    Critical,
}

impl HealthLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthLabel::Healthy => "healthy",
            HealthLabel::Warning => "warning",
            HealthLabel::Critical => "critical",
        }
    }

    /// `critical` wins over `warning`; `warning` when the success rate is
    /// strictly under the threshold.
    pub fn derive(success_rate: f64, recent_critical: bool, warning_threshold: f64) -> Self {
        if recent_critical {
            HealthLabel::Critical
        } else if success_rate < warning_threshold {
            HealthLabel::Warning
        } else {
            HealthLabel::Healthy
        }
    }
}

/// Process-lifetime execution counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub total_executions: u64,
    pub successful_executions: u64,
    /// Includes timeouts and critical failures.
    pub failed_executions: u64,
    pub timed_out_executions: u64,
    pub critical_failures: u64,
    /// Number of times a request found every slot taken and had to wait.
    pub deferred_admissions: u64,
    pub average_duration_ms: f64,
    pub last_execution_at: Option<DateTime<Utc>>,
    pub health: HealthLabel,
}

impl PipelineStats {
    /// Fold one finished execution into the counters.
    pub fn record(&mut self, record: &ExecutionRecord) {
        self.total_executions += 1;
        match record.status {
            ExecutionStatus::Succeeded => self.successful_executions += 1,
            ExecutionStatus::TimedOut => {
                self.failed_executions += 1;
                self.timed_out_executions += 1;
            }
            _ => self.failed_executions += 1,
        }
        if record.critical {
            self.critical_failures += 1;
        }

        let n = self.total_executions as f64;
        self.average_duration_ms += (record.duration_ms as f64 - self.average_duration_ms) / n;

        let finished_at = record.started_at
            + chrono::Duration::milliseconds(record.duration_ms.min(i64::MAX as u64) as i64);
        self.last_execution_at = Some(finished_at);
    }

    /// Percentage of successful executions; 100 when nothing has run yet.
    pub fn success_rate(&self) -> f64 {
        if self.total_executions == 0 {
            return 100.0;
        }
        self.successful_executions as f64 / self.total_executions as f64 * 100.0
    }
}

/// Point-in-time view of the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub running: bool,
    pub stats: PipelineStats,
    pub success_rate: f64,
    pub health: HealthLabel,
    pub active_executions: Vec<String>,
    pub jobs: Vec<String>,
    pub captured_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::history::Trigger;

    fn finished(status: ExecutionStatus, duration_ms: u64, critical: bool) -> ExecutionRecord {
        ExecutionRecord {
            execution_id: "x".into(),
            job_id: "x".into(),
            trigger: Trigger::Scheduled,
            status,
            started_at: Utc::now(),
            duration_ms,
            error: None,
            critical,
            result_summary: None,
        }
    }

    #[test]
    fn test_success_rate_is_100_with_no_history() {
        assert_eq!(PipelineStats::default().success_rate(), 100.0);
    }

    #[test]
    fn test_success_rate_tracks_history() {
        let mut stats = PipelineStats::default();
        stats.record(&finished(ExecutionStatus::Succeeded, 10, false));
        stats.record(&finished(ExecutionStatus::Succeeded, 10, false));
        stats.record(&finished(ExecutionStatus::Failed, 10, false));
        stats.record(&finished(ExecutionStatus::TimedOut, 10, false));
        assert_eq!(stats.total_executions, 4);
        assert_eq!(stats.failed_executions, 2);
        assert_eq!(stats.timed_out_executions, 1);
        assert_eq!(stats.success_rate(), 50.0);
    }

    #[test]
    fn test_running_average_duration() {
        let mut stats = PipelineStats::default();
        for d in [100, 200, 600] {
            stats.record(&finished(ExecutionStatus::Succeeded, d, false));
        }
        assert!((stats.average_duration_ms - 300.0).abs() < 1e-9);
        assert!(stats.last_execution_at.is_some());
    }

    #[test]
    fn test_critical_counts_as_failure_too() {
        let mut stats = PipelineStats::default();
        stats.record(&finished(ExecutionStatus::Failed, 5, true));
        assert_eq!(stats.failed_executions, 1);
        assert_eq!(stats.critical_failures, 1);
    }

    #[test]
    fn test_health_derivation() {
        assert_eq!(HealthLabel::derive(100.0, false, 90.0), HealthLabel::Healthy);
        assert_eq!(HealthLabel::derive(90.0, false, 90.0), HealthLabel::Healthy);
        assert_eq!(HealthLabel::derive(89.9, false, 90.0), HealthLabel::Warning);
        assert_eq!(HealthLabel::derive(100.0, true, 90.0), HealthLabel::Critical);
        assert_eq!(HealthLabel::derive(10.0, true, 90.0), HealthLabel::Critical);
    }
}
