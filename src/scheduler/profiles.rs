//! Default job profile used when the configuration names no jobs.

use super::Priority;
use crate::collectors::CollectorConfig;
use crate::config::JobConfig;

/// Return the default out-of-box jobs.
///
/// Only a heartbeat ships by default; discovery and collection jobs need real
/// collectors configured for the deployment.
pub fn defaults() -> Vec<JobConfig> {
    vec![JobConfig {
        id: "heartbeat".to_string(),
        schedule: "*/5 * * * *".to_string(), // every 5 minutes
        priority: Priority::HIGH,
        enabled: true,
        collector: CollectorConfig::Echo {
            value: serde_json::json!({ "ok": true }),
        },
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::CronSchedule;

    #[test]
    fn test_defaults_have_heartbeat() {
        let jobs = defaults();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, "heartbeat");
    }

    #[test]
    fn test_all_defaults_enabled_and_parse() {
        for job in defaults() {
            assert!(job.enabled);
            CronSchedule::parse(&job.schedule).unwrap();
        }
    }
}
