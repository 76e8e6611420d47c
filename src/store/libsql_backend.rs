//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::onboarding::model::FormData;
use crate::onboarding::state::{AgentConfiguration, AgentStatus, OnboardingProgress, ProgressStatus};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn values_to_json(values: &FormData) -> Result<String, DatabaseError> {
    serde_json::to_string(values).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn values_from_json(s: &str) -> Result<FormData, DatabaseError> {
    serde_json::from_str(s).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

const PROGRESS_COLUMNS: &str =
    "user_id, flow_id, current_step, values_json, status, version, updated_at";

fn row_to_progress(row: &libsql::Row) -> Result<OnboardingProgress, DatabaseError> {
    let col = |e: libsql::Error| DatabaseError::Query(format!("progress row parse: {e}"));
    let status_str: String = row.get(4).map_err(col)?;
    let status = ProgressStatus::parse(&status_str)
        .ok_or_else(|| DatabaseError::Serialization(format!("unknown progress status '{status_str}'")))?;
    let current_step: i64 = row.get(2).map_err(col)?;
    let current_step = usize::try_from(current_step)
        .map_err(|_| DatabaseError::Serialization(format!("negative step index {current_step}")))?;

    Ok(OnboardingProgress {
        user_id: row.get(0).map_err(col)?,
        flow_id: row.get(1).map_err(col)?,
        current_step,
        values: values_from_json(&row.get::<String>(3).map_err(col)?)?,
        status,
        version: row.get(5).map_err(col)?,
        updated_at: parse_datetime(&row.get::<String>(6).map_err(col)?),
    })
}

const CONFIG_COLUMNS: &str = "id, user_id, flow_id, vertical, values_json, status, created_at";

fn row_to_configuration(row: &libsql::Row) -> Result<AgentConfiguration, DatabaseError> {
    let col = |e: libsql::Error| DatabaseError::Query(format!("configuration row parse: {e}"));
    let id_str: String = row.get(0).map_err(col)?;
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| DatabaseError::Serialization(format!("bad configuration id: {e}")))?;
    let status_str: String = row.get(5).map_err(col)?;
    let status = match status_str.as_str() {
        "active" => AgentStatus::Active,
        other => {
            return Err(DatabaseError::Serialization(format!(
                "unknown configuration status '{other}'"
            )));
        }
    };

    Ok(AgentConfiguration {
        id,
        user_id: row.get(1).map_err(col)?,
        flow_id: row.get(2).map_err(col)?,
        vertical: row.get(3).map_err(col)?,
        values: values_from_json(&row.get::<String>(4).map_err(col)?)?,
        status,
        created_at: parse_datetime(&row.get::<String>(6).map_err(col)?),
    })
}

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Progress ────────────────────────────────────────────────────

    async fn get_progress(
        &self,
        user_id: &str,
        flow_id: &str,
    ) -> Result<Option<OnboardingProgress>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {PROGRESS_COLUMNS} FROM onboarding_progress WHERE user_id = ?1 AND flow_id = ?2"
                ),
                params![user_id, flow_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_progress: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_progress(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_progress: {e}"))),
        }
    }

    async fn save_progress(
        &self,
        progress: &OnboardingProgress,
        expected_version: i64,
    ) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let values = values_to_json(&progress.values)?;
        let step = progress.current_step as i64;
        let new_version = expected_version + 1;

        let affected = if expected_version == 0 {
            conn.execute(
                "INSERT INTO onboarding_progress (user_id, flow_id, current_step, values_json, status, version, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (user_id, flow_id) DO NOTHING",
                params![
                    progress.user_id.as_str(),
                    progress.flow_id.as_str(),
                    step,
                    values,
                    progress.status.as_str(),
                    new_version,
                    now,
                ],
            )
            .await
        } else {
            conn.execute(
                "UPDATE onboarding_progress
                 SET current_step = ?1, values_json = ?2, status = ?3, version = ?4, updated_at = ?5
                 WHERE user_id = ?6 AND flow_id = ?7 AND version = ?8",
                params![
                    step,
                    values,
                    progress.status.as_str(),
                    new_version,
                    now,
                    progress.user_id.as_str(),
                    progress.flow_id.as_str(),
                    expected_version,
                ],
            )
            .await
        }
        .map_err(|e| DatabaseError::Query(format!("save_progress: {e}")))?;

        if affected == 0 {
            debug!(
                user_id = %progress.user_id,
                flow_id = %progress.flow_id,
                expected_version,
                "Progress version conflict"
            );
            return Err(DatabaseError::VersionConflict {
                user_id: progress.user_id.clone(),
                flow_id: progress.flow_id.clone(),
            });
        }

        debug!(
            user_id = %progress.user_id,
            flow_id = %progress.flow_id,
            step = progress.current_step,
            version = new_version,
            "Progress saved"
        );
        Ok(new_version)
    }

    async fn mark_progress_completed(
        &self,
        user_id: &str,
        flow_id: &str,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE onboarding_progress
             SET status = 'completed', version = version + 1, updated_at = ?1
             WHERE user_id = ?2 AND flow_id = ?3 AND status != 'completed'",
            params![now, user_id, flow_id],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("mark_progress_completed: {e}")))?;
        Ok(())
    }

    // ── Configurations ──────────────────────────────────────────────

    async fn insert_configuration(
        &self,
        config: &AgentConfiguration,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let values = values_to_json(&config.values)?;
        let inserted = conn
            .execute(
                "INSERT INTO agent_configurations (id, user_id, flow_id, vertical, values_json, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (user_id, flow_id) DO NOTHING",
                params![
                    config.id.to_string(),
                    config.user_id.as_str(),
                    config.flow_id.as_str(),
                    config.vertical.as_str(),
                    values,
                    config.status.as_str(),
                    config.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_configuration: {e}")))?;

        debug!(
            user_id = %config.user_id,
            flow_id = %config.flow_id,
            inserted = inserted > 0,
            "Configuration insert"
        );
        Ok(inserted > 0)
    }

    async fn get_configuration(
        &self,
        user_id: &str,
        flow_id: &str,
    ) -> Result<Option<AgentConfiguration>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {CONFIG_COLUMNS} FROM agent_configurations WHERE user_id = ?1 AND flow_id = ?2"
                ),
                params![user_id, flow_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_configuration: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_configuration(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_configuration: {e}"))),
        }
    }
}
