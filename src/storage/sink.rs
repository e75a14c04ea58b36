//! Persistence sink for execution records and health snapshots.
//!
//! The engine hands every finished record to a sink without waiting on the
//! outcome. Sink errors are logged by the caller and never affect the
//! execution that produced the record.

use anyhow::{Context, Result};
use tokio::sync::Mutex;

use super::Pool;
use crate::scheduler::{ExecutionRecord, PipelineStatus};

/// Append-only store for records and snapshots.
#[async_trait::async_trait]
pub trait RecordSink: Send + Sync {
    async fn append_record(&self, record: &ExecutionRecord) -> Result<()>;
    async fn append_snapshot(&self, status: &PipelineStatus) -> Result<()>;
}

/// Sink writing to the SQLite database on the blocking pool.
#[derive(Clone)]
pub struct SqliteSink {
    pool: Pool,
}

impl SqliteSink {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl RecordSink for SqliteSink {
    async fn append_record(&self, record: &ExecutionRecord) -> Result<()> {
        let pool = self.pool.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = pool.get()?;
            super::insert_record(&conn, &record)
        })
        .await
        .context("record writer task panicked")?
    }

    async fn append_snapshot(&self, status: &PipelineStatus) -> Result<()> {
        let pool = self.pool.clone();
        let status = status.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = pool.get()?;
            super::insert_snapshot(&conn, &status)
        })
        .await
        .context("snapshot writer task panicked")?
    }
}

/// In-process sink, for tests and for running without a database.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<ExecutionRecord>>,
    snapshots: Mutex<Vec<PipelineStatus>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<ExecutionRecord> {
        self.records.lock().await.clone()
    }

    pub async fn snapshots(&self) -> Vec<PipelineStatus> {
        self.snapshots.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl RecordSink for MemorySink {
    async fn append_record(&self, record: &ExecutionRecord) -> Result<()> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }

    async fn append_snapshot(&self, status: &PipelineStatus) -> Result<()> {
        self.snapshots.lock().await.push(status.clone());
        Ok(())
    }
}
