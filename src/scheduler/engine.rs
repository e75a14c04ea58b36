//! Execution engine: admission control, timeout race, and bookkeeping.
//!
//! Every execution, scheduled or manual, passes through [`ExecutionEngine::execute`]:
//!
//! 1. Admission -- wait (re-trying every `defer_retry`) until the number of
//!    active executions is under `concurrency_limit`.
//! 2. Run -- the collector runs on its own task and races the wall-clock
//!    timeout. A timed-out task is detached, not aborted.
//! 3. Finish -- stats, in-memory history and the active set are updated under
//!    one lock, then the record goes to the sink in the background and
//!    critical failures are escalated.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::history::{ExecutionLog, ExecutionRecord, ExecutionStatus, RunningExecution, Trigger};
use super::registry::JobDefinition;
use super::stats::{HealthLabel, PipelineStats, PipelineStatus};
use super::PipelineError;
use crate::config::PipelineSettings;
use crate::detect::{self, CriticalEvent, Escalation};
use crate::storage::RecordSink;

const SUMMARY_MAX_CHARS: usize = 256;

/// Shared mutable state. Only ever touched under the engine's single lock.
struct EngineState {
    active: BTreeSet<String>,
    stats: PipelineStats,
    history: ExecutionLog,
}

pub struct ExecutionEngine {
    settings: PipelineSettings,
    state: Mutex<EngineState>,
    active_tx: watch::Sender<usize>,
    sink: Arc<dyn RecordSink>,
    escalation: Arc<dyn Escalation>,
    persist: TaskTracker,
    seq: AtomicU64,
}

impl ExecutionEngine {
    pub fn new(
        settings: PipelineSettings,
        sink: Arc<dyn RecordSink>,
        escalation: Arc<dyn Escalation>,
    ) -> Self {
        let (active_tx, _) = watch::channel(0);
        Self {
            state: Mutex::new(EngineState {
                active: BTreeSet::new(),
                stats: PipelineStats::default(),
                history: ExecutionLog::new(settings.history_limit),
            }),
            settings,
            active_tx,
            sink,
            escalation,
            persist: TaskTracker::new(),
            seq: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run `job` once and record the outcome.
    ///
    /// Returns the collector's value, or the failure. Callers on the schedule
    /// path drop the error; it has already been logged and recorded.
    pub async fn execute(
        &self,
        job: &JobDefinition,
        trigger: Trigger,
        cancel: &CancellationToken,
    ) -> Result<Value, PipelineError> {
        debug!(job = %job.id, status = %ExecutionStatus::Pending, trigger = trigger.as_str(), "execution requested");
        let running = self.admit(&job.id, trigger, cancel).await?;
        info!(job = %job.id, execution = %running.execution_id(), trigger = trigger.as_str(), "Job started");

        let timeout = self.settings.execution_timeout();
        let work = Arc::clone(&job.work);
        let handle = tokio::spawn(async move { work.collect().await });

        let mut critical_pattern = None;
        let (record, result) = match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(Ok(value))) => {
                let record = running.succeed(Some(summarize(&value)));
                (record, Ok(value))
            }
            Ok(Ok(Err(e))) => {
                let message = format!("{e:#}");
                critical_pattern =
                    detect::match_critical(&message, &self.settings.critical_patterns).map(str::to_string);
                let critical = critical_pattern.is_some();
                let err = if critical {
                    PipelineError::CriticalFailure { job: job.id.clone(), message: message.clone() }
                } else {
                    PipelineError::ExecutionFailure { job: job.id.clone(), message: message.clone() }
                };
                (running.fail(message, critical), Err(err))
            }
            Ok(Err(join_err)) => {
                let message = if join_err.is_panic() {
                    "collector panicked".to_string()
                } else {
                    "collector task was cancelled".to_string()
                };
                let err = PipelineError::ExecutionFailure { job: job.id.clone(), message: message.clone() };
                (running.fail(message, false), Err(err))
            }
            // The spawned collector keeps running; its eventual result is dropped.
            Err(_elapsed) => {
                let err = PipelineError::ExecutionTimeout { job: job.id.clone(), timeout };
                (running.time_out(timeout), Err(err))
            }
        };

        self.finish(record, critical_pattern).await;
        result
    }

    /// Wait for a free slot and claim it.
    async fn admit(
        &self,
        job_id: &str,
        trigger: Trigger,
        cancel: &CancellationToken,
    ) -> Result<RunningExecution, PipelineError> {
        let limit = self.settings.concurrency_limit;
        loop {
            if cancel.is_cancelled() {
                info!(job = %job_id, "execution cancelled before admission");
                return Err(PipelineError::Cancelled(job_id.to_string()));
            }
            {
                let mut state = self.state.lock().await;
                if state.active.len() < limit {
                    let started_at = Utc::now();
                    let seq = self.seq.fetch_add(1, Ordering::Relaxed);
                    let execution_id = format!("{}-{}-{}", job_id, started_at.timestamp_millis(), seq);
                    state.active.insert(execution_id.clone());
                    self.active_tx.send_replace(state.active.len());
                    return Ok(RunningExecution::start(execution_id, job_id, trigger, started_at));
                }
                state.stats.deferred_admissions += 1;
                debug!(job = %job_id, active = state.active.len(), limit, "concurrency limit reached, deferring");
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(job = %job_id, "deferred execution cancelled");
                    return Err(PipelineError::Cancelled(job_id.to_string()));
                }
                _ = tokio::time::sleep(self.settings.defer_retry()) => {}
            }
        }
    }

    async fn finish(&self, record: ExecutionRecord, critical_pattern: Option<String>) {
        {
            let mut state = self.state.lock().await;
            if !state.active.remove(&record.execution_id) {
                debug!(job = %record.job_id, execution = %record.execution_id, "discarding result of abandoned execution");
                return;
            }
            state.stats.record(&record);
            state.history.push(record.clone());
            self.active_tx.send_replace(state.active.len());
        }

        match record.status {
            ExecutionStatus::Succeeded => {
                info!(job = %record.job_id, execution = %record.execution_id, duration_ms = record.duration_ms, "Job finished");
            }
            ExecutionStatus::TimedOut => {
                warn!(job = %record.job_id, execution = %record.execution_id, duration_ms = record.duration_ms, "Job timed out; abandoning collector");
            }
            _ => {
                let message = record.error.as_deref().unwrap_or_default();
                if record.critical {
                    error!(job = %record.job_id, execution = %record.execution_id, "Job failed critically: {}", message);
                } else {
                    warn!(job = %record.job_id, execution = %record.execution_id, "Job failed: {}", message);
                }
            }
        }

        let event = critical_pattern.map(|pattern| CriticalEvent {
            job_id: record.job_id.clone(),
            execution_id: record.execution_id.clone(),
            message: record.error.clone().unwrap_or_default(),
            pattern,
            occurred_at: Utc::now(),
        });

        let sink = Arc::clone(&self.sink);
        self.persist.spawn(async move {
            if let Err(e) = sink.append_record(&record).await {
                warn!(execution = %record.execution_id, "Failed to persist execution record: {:#}", e);
            }
        });

        if let Some(event) = event {
            if let Err(e) = self.escalation.escalate(&event).await {
                warn!(execution = %event.execution_id, "Critical escalation failed: {:#}", e);
            }
        }
    }

    /// Number of executions currently holding a slot.
    pub fn active_count(&self) -> usize {
        *self.active_tx.borrow()
    }

    /// Wait until no executions are active, for at most `grace`.
    /// Returns `true` if the engine drained in time.
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        let mut rx = self.active_tx.subscribe();
        matches!(
            tokio::time::timeout(grace, async { rx.wait_for(|n| *n == 0).await.is_ok() }).await,
            Ok(true)
        )
    }

    /// Stop tracking everything still in flight. The collectors keep running,
    /// but their results will not be recorded. Returns the abandoned ids.
    pub async fn abandon_active(&self) -> Vec<String> {
        let mut state = self.state.lock().await;
        let abandoned: Vec<String> = std::mem::take(&mut state.active).into_iter().collect();
        self.active_tx.send_replace(0);
        abandoned
    }

    /// Wait for queued sink writes to complete.
    pub async fn flush(&self) {
        self.persist.close();
        self.persist.wait().await;
        self.persist.reopen();
    }

    /// Persist a snapshot, logging rather than returning failures.
    pub async fn persist_snapshot(&self, status: &PipelineStatus) {
        if let Err(e) = self.sink.append_snapshot(status).await {
            warn!("Failed to persist health snapshot: {:#}", e);
        }
    }

    /// Point-in-time status. Health is derived fresh on every call.
    pub async fn status(&self, running: bool, jobs: Vec<String>) -> PipelineStatus {
        let state = self.state.lock().await;
        let success_rate = state.stats.success_rate();
        let recent_critical = state
            .history
            .recent(self.settings.recent_window)
            .any(|r| r.critical);
        let health = HealthLabel::derive(success_rate, recent_critical, self.settings.warning_threshold);

        let mut stats = state.stats.clone();
        stats.health = health;

        PipelineStatus {
            running,
            stats,
            success_rate,
            health,
            active_executions: state.active.iter().cloned().collect(),
            jobs,
            captured_at: Utc::now(),
        }
    }

    /// The most recent finished executions, newest first.
    pub async fn recent_records(&self, n: usize) -> Vec<ExecutionRecord> {
        self.state.lock().await.history.recent(n).cloned().collect()
    }
}

/// Compact JSON for logs and records, cut at a char boundary.
fn summarize(value: &Value) -> String {
    let json = value.to_string();
    match json.char_indices().nth(SUMMARY_MAX_CHARS) {
        Some((idx, _)) => format!("{}...", &json[..idx]),
        None => json,
    }
}
