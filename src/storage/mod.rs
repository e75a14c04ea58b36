//! SQLite storage layer -- schema, record/snapshot queries, and the
//! persistence sink the engine writes to.

pub mod schema;
pub mod sink;

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};

use crate::scheduler::{ExecutionRecord, PipelineStatus};

pub use self::sink::{MemorySink, RecordSink, SqliteSink};

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &Path) -> Result<Pool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory {}", parent.display()))?;
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Single-connection in-memory database, migrated. Each pooled connection to
/// `:memory:` is its own database, hence the pool size of one.
pub fn open_memory_pool() -> Result<Pool> {
    let manager = SqliteConnectionManager::memory();
    let pool = R2D2Pool::builder().max_size(1).build(manager)?;
    let conn = pool.get()?;
    schema::migrate(&conn)?;
    Ok(pool)
}

/// Append a finished execution record.
pub fn insert_record(conn: &Connection, record: &ExecutionRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO execution_records (
            execution_id, job_id, trigger_kind, status, started_at,
            duration_ms, error, critical, result_summary
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            record.execution_id,
            record.job_id,
            record.trigger.as_str(),
            record.status.as_str(),
            record.started_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            record.duration_ms as i64,
            record.error,
            record.critical,
            record.result_summary,
        ],
    )
    .context("Failed to insert execution record")?;
    Ok(())
}

/// Most recent execution records, newest first, optionally for one job.
pub fn list_records(pool: &Pool, limit: usize, job_id: Option<&str>) -> Result<Vec<ExecutionRecord>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT execution_id, job_id, trigger_kind, status, started_at,
                duration_ms, error, critical, result_summary
         FROM execution_records
         WHERE ?1 IS NULL OR job_id = ?1
         ORDER BY started_at DESC, id DESC
         LIMIT ?2",
    )?;

    let rows = stmt.query_map(params![job_id, limit as i64], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, i64>(5)?,
            row.get::<_, Option<String>>(6)?,
            row.get::<_, bool>(7)?,
            row.get::<_, Option<String>>(8)?,
        ))
    })?;

    let mut records = Vec::new();
    for r in rows {
        let (execution_id, job_id, trigger, status, started_at, duration_ms, error, critical, result_summary) = r?;
        records.push(ExecutionRecord {
            trigger: trigger.parse().map_err(anyhow::Error::msg)?,
            status: status.parse().map_err(anyhow::Error::msg)?,
            started_at: DateTime::parse_from_rfc3339(&started_at)
                .with_context(|| format!("bad started_at for {execution_id}"))?
                .with_timezone(&Utc),
            duration_ms: duration_ms.max(0) as u64,
            execution_id,
            job_id,
            error,
            critical,
            result_summary,
        });
    }
    Ok(records)
}

/// Append a health snapshot.
pub fn insert_snapshot(conn: &Connection, status: &PipelineStatus) -> Result<()> {
    let snapshot_json = serde_json::to_string(status)?;
    conn.execute(
        "INSERT INTO health_snapshots (health, success_rate, snapshot_json, captured_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            status.health.as_str(),
            status.success_rate,
            snapshot_json,
            status.captured_at.to_rfc3339_opts(SecondsFormat::Micros, true),
        ],
    )
    .context("Failed to insert health snapshot")?;
    Ok(())
}

/// The newest persisted health snapshot, if any.
pub fn latest_snapshot(pool: &Pool) -> Result<Option<PipelineStatus>> {
    let conn = pool.get()?;
    let json: Option<String> = conn
        .query_row(
            "SELECT snapshot_json FROM health_snapshots ORDER BY captured_at DESC, id DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    json.map(|j| serde_json::from_str(&j).context("Failed to decode health snapshot"))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{ExecutionStatus, HealthLabel, PipelineStats, Trigger};

    fn record(id: &str, job: &str, secs: i64, status: ExecutionStatus) -> ExecutionRecord {
        ExecutionRecord {
            execution_id: id.to_string(),
            job_id: job.to_string(),
            trigger: Trigger::Scheduled,
            status,
            started_at: DateTime::from_timestamp(1_770_000_000 + secs, 0).unwrap(),
            duration_ms: 42,
            error: (status != ExecutionStatus::Succeeded).then(|| "boom".to_string()),
            critical: false,
            result_summary: None,
        }
    }

    #[test]
    fn test_records_round_trip_newest_first() {
        let pool = open_memory_pool().unwrap();
        {
            let conn = pool.get().unwrap();
            insert_record(&conn, &record("a-1", "a", 0, ExecutionStatus::Succeeded)).unwrap();
            insert_record(&conn, &record("b-1", "b", 1, ExecutionStatus::TimedOut)).unwrap();
            insert_record(&conn, &record("a-2", "a", 2, ExecutionStatus::Failed)).unwrap();
        }

        let all = list_records(&pool, 10, None).unwrap();
        let ids: Vec<&str> = all.iter().map(|r| r.execution_id.as_str()).collect();
        assert_eq!(ids, vec!["a-2", "b-1", "a-1"]);
        assert_eq!(all[1].status, ExecutionStatus::TimedOut);
        assert_eq!(all[0].error.as_deref(), Some("boom"));

        let only_a = list_records(&pool, 10, Some("a")).unwrap();
        assert_eq!(only_a.len(), 2);
        assert!(only_a.iter().all(|r| r.job_id == "a"));
    }

    #[test]
    fn test_duplicate_execution_id_is_rejected() {
        let pool = open_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let r = record("a-1", "a", 0, ExecutionStatus::Succeeded);
        insert_record(&conn, &r).unwrap();
        assert!(insert_record(&conn, &r).is_err());
    }

    #[test]
    fn test_latest_snapshot() {
        let pool = open_memory_pool().unwrap();
        assert!(latest_snapshot(&pool).unwrap().is_none());

        let mut status = PipelineStatus {
            running: true,
            stats: PipelineStats::default(),
            success_rate: 100.0,
            health: HealthLabel::Healthy,
            active_executions: vec![],
            jobs: vec!["heartbeat".into()],
            captured_at: Utc::now(),
        };
        insert_snapshot(&pool.get().unwrap(), &status).unwrap();
        status.health = HealthLabel::Warning;
        status.captured_at += chrono::Duration::seconds(5);
        insert_snapshot(&pool.get().unwrap(), &status).unwrap();

        let latest = latest_snapshot(&pool).unwrap().unwrap();
        assert_eq!(latest.health, HealthLabel::Warning);
        assert_eq!(latest.jobs, vec!["heartbeat"]);
    }

    #[test]
    fn test_open_pool_creates_parent_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("pipeline.db");
        let pool = open_pool(&path).unwrap();
        assert!(path.exists());
        assert!(list_records(&pool, 5, None).unwrap().is_empty());
    }
}
