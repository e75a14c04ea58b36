//! The pipeline orchestrator: job table, timers, and lifecycle.
//!
//! Each registered job gets one timer task while the orchestrator is running.
//! A fire never runs work inline; it spawns an execution request onto the
//! engine so a slow or deferred job never holds up its timer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cron::CronSchedule;
use super::engine::ExecutionEngine;
use super::history::Trigger;
use super::queue::Priority;
use super::registry::{JobDefinition, JobRegistry, UpcomingRun};
use super::stats::PipelineStatus;
use super::PipelineError;
use crate::collectors::Collector;
use crate::config::PipelineSettings;
use crate::detect::Escalation;
use crate::storage::RecordSink;

/// Result of [`Orchestrator::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { timers: usize },
    AlreadyRunning,
}

/// Result of [`Orchestrator::stop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped(StopReport),
    NotRunning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReport {
    /// True if every in-flight execution finished within the grace period.
    pub drained: bool,
    /// Executions still running when the grace period ran out.
    pub abandoned: Vec<String>,
}

struct Lifecycle {
    running: bool,
    timers: Vec<JoinHandle<()>>,
    snapshots: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        for timer in &self.timers {
            timer.abort();
        }
        if let Some(task) = &self.snapshots {
            task.abort();
        }
        self.cancel.cancel();
    }
}

pub struct Orchestrator {
    registry: RwLock<JobRegistry>,
    engine: Arc<ExecutionEngine>,
    lifecycle: Mutex<Lifecycle>,
}

impl Orchestrator {
    pub fn new(
        settings: PipelineSettings,
        sink: Arc<dyn RecordSink>,
        escalation: Arc<dyn Escalation>,
    ) -> Self {
        Self {
            registry: RwLock::new(JobRegistry::new()),
            engine: Arc::new(ExecutionEngine::new(settings, sink, escalation)),
            lifecycle: Mutex::new(Lifecycle {
                running: false,
                timers: Vec::new(),
                snapshots: None,
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    /// Register a job at normal priority.
    pub async fn register(
        &self,
        job_id: &str,
        schedule: &str,
        work: Arc<dyn Collector>,
    ) -> Result<(), PipelineError> {
        self.register_with_priority(job_id, schedule, Priority::default(), work)
            .await
    }

    /// Register a job. The job table is fixed while the timers run.
    pub async fn register_with_priority(
        &self,
        job_id: &str,
        schedule: &str,
        priority: Priority,
        work: Arc<dyn Collector>,
    ) -> Result<(), PipelineError> {
        let lifecycle = self.lifecycle.lock().await;
        if lifecycle.running {
            return Err(PipelineError::AlreadyRunning);
        }
        let job = self
            .registry
            .write()
            .await
            .register(job_id, schedule, priority, work)?;
        info!(job = %job.id, schedule = %job.schedule, priority = %job.priority, kind = job.work.kind(), "Job registered");
        Ok(())
    }

    /// Arm one timer per registered job.
    pub async fn start(&self) -> StartOutcome {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.running {
            debug!("start requested while already running");
            return StartOutcome::AlreadyRunning;
        }

        let registry = self.registry.read().await;
        let cancel = lifecycle.cancel.clone();
        lifecycle.timers = registry
            .jobs()
            .map(|job| {
                tokio::spawn(run_timer(
                    Arc::clone(job),
                    Arc::clone(&self.engine),
                    cancel.clone(),
                ))
            })
            .collect();

        let interval = self.engine.settings().snapshot_interval();
        lifecycle.snapshots = interval.map(|every| {
            tokio::spawn(run_snapshots(Arc::clone(&self.engine), registry.ids(), every))
        });

        lifecycle.running = true;
        let timers = lifecycle.timers.len();
        info!(timers, "Pipeline started");
        StartOutcome::Started { timers }
    }

    /// Disarm all timers, then wait up to the shutdown grace period for
    /// in-flight executions. Whatever is still running afterwards is abandoned.
    pub async fn stop(&self) -> StopOutcome {
        {
            let mut lifecycle = self.lifecycle.lock().await;
            if !lifecycle.running {
                return StopOutcome::NotRunning;
            }
            for timer in lifecycle.timers.drain(..) {
                timer.abort();
            }
            if let Some(task) = lifecycle.snapshots.take() {
                task.abort();
            }
            // Deferred requests give up; manual runs after this get a fresh token.
            let old = std::mem::replace(&mut lifecycle.cancel, CancellationToken::new());
            old.cancel();
            lifecycle.running = false;
        }

        let grace = self.engine.settings().shutdown_grace();
        info!(active = self.engine.active_count(), grace_secs = grace.as_secs(), "Pipeline stopping, draining executions");

        let drained = self.engine.wait_idle(grace).await;
        let abandoned = if drained {
            Vec::new()
        } else {
            let abandoned = self.engine.abandon_active().await;
            warn!(count = abandoned.len(), executions = ?abandoned, "Grace period elapsed, abandoning executions");
            abandoned
        };

        let status = self.get_pipeline_status().await;
        self.engine.persist_snapshot(&status).await;
        self.engine.flush().await;

        info!(drained, "Pipeline stopped");
        StopOutcome::Stopped(StopReport { drained, abandoned })
    }

    /// Run a registered job now, outside its schedule, and hand back its
    /// result or failure.
    pub async fn run_job(&self, job_id: &str) -> Result<Value, PipelineError> {
        let job = self
            .registry
            .read()
            .await
            .get(job_id)
            .ok_or_else(|| PipelineError::UnknownJob(job_id.to_string()))?;
        let cancel = self.lifecycle.lock().await.cancel.clone();

        info!(job = %job.id, "Manual run requested");
        self.engine.execute(&job, Trigger::Manual, &cancel).await
    }

    /// Snapshot of running flag, counters, active executions, and job ids.
    /// Read-only.
    pub async fn get_pipeline_status(&self) -> PipelineStatus {
        let running = self.lifecycle.lock().await.running;
        let jobs = self.registry.read().await.ids();
        self.engine.status(running, jobs).await
    }

    /// `successful / total * 100`, or 100 before anything has run.
    pub async fn success_rate(&self) -> f64 {
        self.get_pipeline_status().await.success_rate
    }

    pub async fn is_running(&self) -> bool {
        self.lifecycle.lock().await.running
    }

    /// Live timer tasks: one per job while running, zero otherwise.
    pub async fn timer_count(&self) -> usize {
        self.lifecycle
            .lock()
            .await
            .timers
            .iter()
            .filter(|t| !t.is_finished())
            .count()
    }

    pub async fn job_ids(&self) -> Vec<String> {
        self.registry.read().await.ids()
    }

    pub async fn job(&self, job_id: &str) -> Option<Arc<JobDefinition>> {
        self.registry.read().await.get(job_id)
    }

    /// Upcoming fires over the next `hours`, sorted by time.
    pub async fn preview(&self, hours: u64) -> Vec<UpcomingRun> {
        let now = Utc::now();
        let end = now + chrono::Duration::hours(hours.min(24 * 366) as i64);
        self.registry.read().await.preview(&now, &end)
    }
}

/// Timer loop for one job. Fire times are walked from a cursor rather than
/// from `now`, so a fire that lands a little early never repeats.
async fn run_timer(job: Arc<JobDefinition>, engine: Arc<ExecutionEngine>, cancel: CancellationToken) {
    debug!(job = %job.id, "Timer armed");
    let mut cursor: DateTime<Utc> = Utc::now();

    while let Some(next) = job.schedule.next_after(&cursor) {
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;
        debug!(job = %job.id, fire_at = %next, "Timer fired");

        let (job_ref, engine_ref, cancel_ref) = (Arc::clone(&job), Arc::clone(&engine), cancel.clone());
        tokio::spawn(async move {
            // Failures are already logged and recorded by the engine.
            if let Err(e) = engine_ref.execute(&job_ref, Trigger::Scheduled, &cancel_ref).await {
                debug!(job = %job_ref.id, "Scheduled execution did not succeed: {}", e);
            }
        });

        cursor = advance_cursor(&job.schedule, next, Utc::now());
        if cursor != next {
            warn!(job = %job.id, fired_for = %next, "Timer fell behind the wall clock; skipping missed fires");
        }
    }

    warn!(job = %job.id, "Schedule has no further fire times; timer exiting");
}

/// Cursor to walk from after firing for `fired`. If the following fire time
/// has already passed (host suspend, clock step), restart from `now` so the
/// missed fires collapse into the one that just ran.
fn advance_cursor(schedule: &CronSchedule, fired: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    match schedule.next_after(&fired) {
        Some(following) if following < now => now,
        _ => fired,
    }
}

/// Persist a health snapshot every `every` until aborted.
async fn run_snapshots(engine: Arc<ExecutionEngine>, jobs: Vec<String>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    // The first tick completes immediately; skip it so the first snapshot
    // reflects some activity.
    interval.tick().await;
    loop {
        interval.tick().await;
        let status = engine.status(true, jobs.clone()).await;
        debug!(health = status.health.as_str(), success_rate = status.success_rate, "Persisting health snapshot");
        engine.persist_snapshot(&status).await;
    }
}
