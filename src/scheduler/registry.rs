//! The job table: named jobs bound to cron schedules.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::cron::CronSchedule;
use super::queue::Priority;
use super::PipelineError;
use crate::collectors::Collector;

/// A registered job. Immutable once registered.
pub struct JobDefinition {
    pub id: String,
    pub schedule: CronSchedule,
    pub priority: Priority,
    pub work: Arc<dyn Collector>,
}

impl fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDefinition")
            .field("id", &self.id)
            .field("schedule", &self.schedule.as_str())
            .field("priority", &self.priority)
            .field("kind", &self.work.kind())
            .finish()
    }
}

/// One upcoming fire in a dry-run preview.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpcomingRun {
    pub at: DateTime<Utc>,
    pub job_id: String,
    pub priority: Priority,
}

/// Jobs keyed by id, iterated in id order.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: BTreeMap<String, Arc<JobDefinition>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `schedule` and store the job.
    ///
    /// A duplicate id is rejected before the schedule is looked at and leaves
    /// the existing registration untouched.
    pub fn register(
        &mut self,
        job_id: &str,
        schedule: &str,
        priority: Priority,
        work: Arc<dyn Collector>,
    ) -> Result<Arc<JobDefinition>, PipelineError> {
        if self.jobs.contains_key(job_id) {
            return Err(PipelineError::DuplicateJob(job_id.to_string()));
        }
        let schedule = CronSchedule::parse(schedule)?;

        let job = Arc::new(JobDefinition {
            id: job_id.to_string(),
            schedule,
            priority,
            work,
        });
        self.jobs.insert(job.id.clone(), Arc::clone(&job));
        Ok(job)
    }

    pub fn get(&self, job_id: &str) -> Option<Arc<JobDefinition>> {
        self.jobs.get(job_id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.jobs.keys().cloned().collect()
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Arc<JobDefinition>> {
        self.jobs.values()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Every fire in `(start, end]` across all jobs, ordered by time then id.
    /// This is strictly a dry-run preview, not the execution loop.
    pub fn preview(&self, start: &DateTime<Utc>, end: &DateTime<Utc>) -> Vec<UpcomingRun> {
        let mut preview: Vec<UpcomingRun> = self
            .jobs
            .values()
            .flat_map(|job| {
                job.schedule
                    .fires_between(start, end)
                    .into_iter()
                    .map(move |at| UpcomingRun {
                        at,
                        job_id: job.id.clone(),
                        priority: job.priority,
                    })
            })
            .collect();

        preview.sort_by(|a, b| a.at.cmp(&b.at).then_with(|| a.job_id.cmp(&b.job_id)));
        preview
    }
}
