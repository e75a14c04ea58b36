//! Discovery pipeline -- cron-driven job orchestration with bounded
//! concurrency, execution timeouts, and health reporting.
//!
//! This crate provides the core library for the job table, the execution
//! engine, failure classification, persistence, and the built-in collectors.

pub mod collectors;
pub mod config;
pub mod detect;
pub mod scheduler;
pub mod storage;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::PipelineConfig;
use crate::detect::{Escalation, IncidentStore};
use crate::scheduler::Orchestrator;
use crate::storage::{RecordSink, SqliteSink};

/// Build an orchestrator and register every enabled job from `config`.
pub async fn build_orchestrator(
    config: &PipelineConfig,
    sink: Arc<dyn RecordSink>,
    escalation: Arc<dyn Escalation>,
) -> Result<Orchestrator> {
    let orchestrator = Orchestrator::new(config.pipeline.clone(), sink, escalation);

    for job in config.jobs.iter().filter(|j| j.enabled) {
        let work = collectors::build(&job.collector)
            .with_context(|| format!("failed to build collector for job '{}'", job.id))?;
        orchestrator
            .register_with_priority(&job.id, &job.schedule, job.priority, work)
            .await?;
    }

    let skipped = config.jobs.iter().filter(|j| !j.enabled).count();
    if skipped > 0 {
        tracing::info!(skipped, "Disabled jobs not registered");
    }

    Ok(orchestrator)
}

/// Start the pipeline daemon: storage, job timers, and periodic health
/// snapshots. Runs until ctrl-c, then drains in-flight executions.
pub async fn serve(config: PipelineConfig) -> Result<()> {
    // 1. Initialize Storage
    let db_path = &config.storage.db_path;
    tracing::info!(db_path = %db_path.display(), "Initializing database");
    let pool = storage::open_pool(db_path)?;

    let sink = Arc::new(SqliteSink::new(pool.clone()));
    let incidents = Arc::new(IncidentStore::new(pool));

    // 2. Register jobs
    let orchestrator = build_orchestrator(&config, sink, incidents).await?;

    // 3. Arm timers
    orchestrator.start().await;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    if let scheduler::StopOutcome::Stopped(report) = orchestrator.stop().await {
        if !report.abandoned.is_empty() {
            tracing::warn!(abandoned = ?report.abandoned, "Executions abandoned at shutdown");
        }
    }

    Ok(())
}
