use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::named_params;
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

use super::{CriticalEvent, Escalation, Severity};
use crate::storage::Pool;

/// A recorded incident with verdict and evidence.
#[derive(Debug, Clone, Serialize)]
pub struct Incident {
    pub id: Uuid,
    pub severity: Severity,
    pub verdict: String,
    pub evidence: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Persists critical failures as incidents.
#[derive(Clone)]
pub struct IncidentStore {
    pool: Pool,
}

impl IncidentStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Store one incident and return its id.
    pub fn record_incident(&self, verdict: &str, severity: Severity, evidence: serde_json::Value) -> Result<Uuid> {
        let incident = Incident {
            id: Uuid::new_v4(),
            severity,
            verdict: verdict.to_string(),
            evidence,
            created_at: Utc::now(),
        };

        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO incidents (id, severity, verdict, evidence_json, created_at)
             VALUES (:id, :severity, :verdict, :evidence, :created_at)",
            named_params! {
                ":id": incident.id.to_string(),
                ":severity": incident.severity.as_str(),
                ":verdict": incident.verdict,
                ":evidence": serde_json::to_string(&incident.evidence)?,
                ":created_at": incident.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            },
        )
        .context("Failed to insert incident")?;

        Ok(incident.id)
    }

    /// Newest incidents first.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<Incident>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, severity, verdict, evidence_json, created_at
             FROM incidents
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let incidents = rows
            .map(|row| -> Result<Incident> {
                let (id, severity, verdict, evidence, created_at) = row?;
                Ok(Incident {
                    id: Uuid::parse_str(&id).with_context(|| format!("bad incident id {id}"))?,
                    severity: severity.parse().map_err(anyhow::Error::msg)?,
                    evidence: serde_json::from_str(&evidence)
                        .with_context(|| format!("bad evidence for incident {id}"))?,
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .with_context(|| format!("bad created_at for incident {id}"))?
                        .with_timezone(&Utc),
                    verdict,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(incidents)
    }
}

#[async_trait::async_trait]
impl Escalation for IncidentStore {
    async fn escalate(&self, event: &CriticalEvent) -> Result<()> {
        error!(
            job = %event.job_id,
            execution = %event.execution_id,
            pattern = %event.pattern,
            "CRITICAL: {}",
            event.message
        );

        let store = self.clone();
        let verdict = format!("Critical failure in {}", event.job_id);
        let evidence = serde_json::to_value(event)?;
        tokio::task::spawn_blocking(move || store.record_incident(&verdict, Severity::Critical, evidence))
            .await
            .context("incident writer task panicked")??;
        Ok(())
    }
}
