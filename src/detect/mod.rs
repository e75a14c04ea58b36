//! Failure classification and critical-failure escalation.

pub mod incident;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

pub use self::incident::{Incident, IncidentStore};

/// Severity levels for recorded incidents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// Return the first pattern found in `message`, ignoring case.
pub fn match_critical<'a>(message: &str, patterns: &'a [String]) -> Option<&'a str> {
    let haystack = message.to_lowercase();
    patterns
        .iter()
        .find(|p| !p.is_empty() && haystack.contains(&p.to_lowercase()))
        .map(String::as_str)
}

/// A failure that matched a critical pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalEvent {
    pub job_id: String,
    pub execution_id: String,
    pub message: String,
    pub pattern: String,
    pub occurred_at: DateTime<Utc>,
}

/// Hook invoked once per critical failure, on top of normal bookkeeping.
#[async_trait::async_trait]
pub trait Escalation: Send + Sync {
    async fn escalate(&self, event: &CriticalEvent) -> anyhow::Result<()>;
}

/// Escalation that only logs at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEscalation;

#[async_trait::async_trait]
impl Escalation for LogEscalation {
    async fn escalate(&self, event: &CriticalEvent) -> anyhow::Result<()> {
        error!(
            job = %event.job_id,
            execution = %event.execution_id,
            pattern = %event.pattern,
            "CRITICAL: {}",
            event.message
        );
        Ok(())
    }
}
