//! End-to-end pipeline tests against a real SQLite database.

use std::sync::Arc;

use discovery_pipeline::collectors::{self, CollectorConfig};
use discovery_pipeline::config::{JobConfig, PipelineConfig, PipelineSettings};
use discovery_pipeline::detect::IncidentStore;
use discovery_pipeline::scheduler::{ExecutionStatus, HealthLabel, PipelineError, Priority, StopOutcome, Trigger};
use discovery_pipeline::storage::{self, SqliteSink};
use serde_json::Value;

fn settings() -> PipelineSettings {
    PipelineSettings {
        concurrency_limit: 2,
        execution_timeout_secs: 5,
        shutdown_grace_secs: 1,
        defer_retry_ms: 20,
        snapshot_interval_secs: 0,
        ..PipelineSettings::default()
    }
}

#[tokio::test]
async fn test_critical_failure_becomes_incident() {
    let dir = tempfile::TempDir::new().unwrap();
    let pool = storage::open_pool(&dir.path().join("pipeline.db")).unwrap();
    let incidents = Arc::new(IncidentStore::new(pool.clone()));

    let config = PipelineConfig {
        pipeline: settings(),
        jobs: vec![],
        ..PipelineConfig::default()
    };
    let orch = discovery_pipeline::build_orchestrator(&config, Arc::new(SqliteSink::new(pool.clone())), incidents.clone())
        .await
        .unwrap();
    orch.register_with_priority(
        "inventory",
        "0 */6 * * *",
        Priority::HIGH,
        collectors::from_fn(|| async { Err::<Value, _>(anyhow::anyhow!("connect ECONNREFUSED 10.0.0.5:443")) }),
    )
    .await
    .unwrap();

    let err = tokio_test::assert_err!(orch.run_job("inventory").await);
    assert!(matches!(err, PipelineError::CriticalFailure { .. }));
    orch.engine().flush().await;

    let status = orch.get_pipeline_status().await;
    assert_eq!(status.health, HealthLabel::Critical);
    assert_eq!(status.stats.critical_failures, 1);

    let records = storage::list_records(&pool, 10, Some("inventory")).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ExecutionStatus::Failed);
    assert_eq!(records[0].trigger, Trigger::Manual);
    assert!(records[0].critical);

    let recorded = incidents.list_recent(5).unwrap();
    assert_eq!(recorded.len(), 1);
    assert!(recorded[0].verdict.contains("inventory"));
}

#[tokio::test]
async fn test_configured_jobs_run_and_stop_persists_snapshot() {
    let dir = tempfile::TempDir::new().unwrap();
    let pool = storage::open_pool(&dir.path().join("pipeline.db")).unwrap();

    let config = PipelineConfig {
        pipeline: settings(),
        jobs: vec![
            JobConfig {
                id: "echo".into(),
                schedule: "0 0 * * *".into(),
                priority: Priority::NORMAL,
                enabled: true,
                collector: CollectorConfig::Echo {
                    value: serde_json::json!({ "hosts": 4 }),
                },
            },
            JobConfig {
                id: "disabled".into(),
                schedule: "0 0 * * *".into(),
                priority: Priority::LOW,
                enabled: false,
                collector: CollectorConfig::Echo { value: Value::Null },
            },
        ],
        ..PipelineConfig::default()
    };
    let orch = discovery_pipeline::build_orchestrator(
        &config,
        Arc::new(SqliteSink::new(pool.clone())),
        Arc::new(IncidentStore::new(pool.clone())),
    )
    .await
    .unwrap();
    assert_eq!(orch.job_ids().await, vec!["echo"]);

    orch.start().await;
    assert_eq!(orch.run_job("echo").await.unwrap()["hosts"], 4);
    assert!(matches!(orch.stop().await, StopOutcome::Stopped(ref r) if r.drained));

    let snapshot = storage::latest_snapshot(&pool).unwrap().unwrap();
    assert!(!snapshot.running);
    assert_eq!(snapshot.stats.successful_executions, 1);
    assert_eq!(snapshot.health, HealthLabel::Healthy);
    assert_eq!(storage::list_records(&pool, 10, None).unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_job_schedule_fails_build() {
    let config = PipelineConfig {
        pipeline: settings(),
        jobs: vec![JobConfig {
            id: "bad".into(),
            schedule: "every tuesday".into(),
            priority: Priority::NORMAL,
            enabled: true,
            collector: CollectorConfig::Echo { value: Value::Null },
        }],
        ..PipelineConfig::default()
    };
    let res = discovery_pipeline::build_orchestrator(
        &config,
        Arc::new(storage::MemorySink::new()),
        Arc::new(discovery_pipeline::detect::LogEscalation),
    )
    .await;
    assert!(res.is_err());
}
