//! Job scheduling -- cron parsing, the job table, the execution engine, and
//! health reporting.

pub mod cron;
pub mod engine;
pub mod history;
pub mod orchestrator;
pub mod profiles;
pub mod queue;
pub mod registry;
pub mod stats;

use std::time::Duration;

use thiserror::Error;

// Re-export common types
pub use self::cron::CronSchedule;
pub use self::engine::ExecutionEngine;
pub use self::history::{ExecutionRecord, ExecutionStatus, Trigger};
pub use self::orchestrator::{Orchestrator, StartOutcome, StopOutcome, StopReport};
pub use self::queue::Priority;
pub use self::registry::{JobDefinition, JobRegistry, UpcomingRun};
pub use self::stats::{HealthLabel, PipelineStats, PipelineStatus};

/// Errors raised by the job table and the execution engine.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("job '{0}' is already registered")]
    DuplicateJob(String),

    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidSchedule { expr: String, reason: String },

    #[error("job '{0}' is not registered")]
    UnknownJob(String),

    #[error("pipeline is running; stop it before changing the job table")]
    AlreadyRunning,

    #[error("job '{job}' failed: {message}")]
    ExecutionFailure { job: String, message: String },

    #[error("job '{job}' timed out after {}s", timeout.as_secs_f64())]
    ExecutionTimeout { job: String, timeout: Duration },

    #[error("job '{job}' hit a critical failure: {message}")]
    CriticalFailure { job: String, message: String },

    #[error("job '{0}' was cancelled while waiting for a free execution slot")]
    Cancelled(String),
}

impl PipelineError {
    /// True for the failure variants produced by running a job, as opposed to
    /// errors raised while managing the job table.
    pub fn is_execution_error(&self) -> bool {
        matches!(
            self,
            PipelineError::ExecutionFailure { .. }
                | PipelineError::ExecutionTimeout { .. }
                | PipelineError::CriticalFailure { .. }
        )
    }
}
