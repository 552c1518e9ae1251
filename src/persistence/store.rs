//! SQLite-based persistence store

use crate::core::{ExecutionStatus, StepReport};
use crate::persistence::{ExecutionSummary, PersistenceBackend};
use crate::registry::{ApprovalStatus, ModelPackage};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

const EXECUTION_COLUMNS: &str = "id, pipeline_name, pipeline_arn, status, failure_reason, started_at, \
     completed_at, succeeded_steps, total_steps, steps";

/// SQLite execution store
pub struct SqliteExecutionStore {
    pool: SqlitePool,
}

impl SqliteExecutionStore {
    /// Create a new SQLite store
    pub async fn new(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path))
            .context("Invalid database path")?
            .create_if_missing(true);
        // One connection keeps `:memory:` databases shared across queries
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("mlpipe");
        std::fs::create_dir_all(&db_dir)?;

        let db_path = db_dir.join("executions.db");
        let db_path = db_path
            .to_str()
            .ok_or_else(|| anyhow!("Database path is not valid UTF-8"))?;
        Self::new(db_path).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                pipeline_name TEXT NOT NULL,
                pipeline_arn TEXT NOT NULL,
                status TEXT NOT NULL,
                failure_reason TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                succeeded_steps INTEGER NOT NULL DEFAULT 0,
                total_steps INTEGER NOT NULL DEFAULT 0,
                steps TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_pipeline_name ON executions(pipeline_name);
            CREATE INDEX IF NOT EXISTS idx_started_at ON executions(started_at);

            CREATE TABLE IF NOT EXISTS model_packages (
                arn TEXT PRIMARY KEY,
                package_group TEXT NOT NULL,
                version INTEGER NOT NULL,
                approval_status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                package TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_package_group_version
                ON model_packages(package_group, version);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn summary_from_row(row: &SqliteRow) -> Result<ExecutionSummary> {
        let status: String = row.get("status");
        let steps: String = row.get("steps");
        Ok(ExecutionSummary {
            execution_arn: row.get("id"),
            pipeline_name: row.get("pipeline_name"),
            pipeline_arn: row.get("pipeline_arn"),
            status: ExecutionStatus::parse(&status)
                .ok_or_else(|| anyhow!("Unknown execution status '{}'", status))?,
            failure_reason: row.get("failure_reason"),
            started_at: Self::from_naive(row.get("started_at")),
            completed_at: row
                .get::<Option<NaiveDateTime>, _>("completed_at")
                .map(Self::from_naive),
            succeeded_steps: row.get::<i64, _>("succeeded_steps") as usize,
            total_steps: row.get::<i64, _>("total_steps") as usize,
            steps: serde_json::from_str::<Vec<StepReport>>(&steps)
                .context("Failed to decode step trace")?,
        })
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqliteExecutionStore {
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO executions
            (id, pipeline_name, pipeline_arn, status, failure_reason, started_at, completed_at,
             succeeded_steps, total_steps, steps)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&execution.execution_arn)
        .bind(&execution.pipeline_name)
        .bind(&execution.pipeline_arn)
        .bind(execution.status.as_str())
        .bind(&execution.failure_reason)
        .bind(Self::to_naive(execution.started_at))
        .bind(execution.completed_at.map(Self::to_naive))
        .bind(execution.succeeded_steps as i64)
        .bind(execution.total_steps as i64)
        .bind(serde_json::to_string(&execution.steps)?)
        .execute(&self.pool)
        .await
        .context("Failed to save execution")?;

        Ok(())
    }

    async fn load_execution(&self, execution_id: &str) -> Result<Option<ExecutionSummary>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM executions WHERE id = ?1 OR id LIKE ?2 LIMIT 2",
            EXECUTION_COLUMNS
        ))
        .bind(execution_id)
        .bind(format!("%/execution/{}%", execution_id))
        .fetch_all(&self.pool)
        .await
        .context("Failed to load execution")?;

        if let Some(exact) = rows
            .iter()
            .find(|row| row.get::<String, _>("id") == execution_id)
        {
            return Self::summary_from_row(exact).map(Some);
        }
        match rows.as_slice() {
            [only] => Self::summary_from_row(only).map(Some),
            _ => Ok(None),
        }
    }

    async fn list_executions(&self, pipeline_name: &str) -> Result<Vec<ExecutionSummary>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM executions WHERE pipeline_name = ?1 ORDER BY started_at DESC",
            EXECUTION_COLUMNS
        ))
        .bind(pipeline_name)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list executions")?;

        rows.iter().map(Self::summary_from_row).collect()
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT pipeline_name
            FROM executions
            ORDER BY pipeline_name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list pipelines")?;

        Ok(rows.iter().map(|row| row.get("pipeline_name")).collect())
    }

    async fn save_model_package(&self, package: &ModelPackage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO model_packages
            (arn, package_group, version, approval_status, created_at, package)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&package.arn)
        .bind(&package.group)
        .bind(package.version as i64)
        .bind(package.approval_status.as_str())
        .bind(Self::to_naive(package.created_at))
        .bind(serde_json::to_string(package)?)
        .execute(&self.pool)
        .await
        .context("Failed to save model package")?;

        Ok(())
    }

    async fn list_model_packages(&self, group: &str) -> Result<Vec<ModelPackage>> {
        let rows = sqlx::query(
            r#"
            SELECT package, approval_status
            FROM model_packages
            WHERE package_group = ?1
            ORDER BY created_at DESC, version DESC
            "#,
        )
        .bind(group)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list model packages")?;

        rows.iter()
            .map(|row| -> Result<ModelPackage> {
                let mut package: ModelPackage = serde_json::from_str(&row.get::<String, _>("package"))?;
                let status: String = row.get("approval_status");
                if let Some(status) = ApprovalStatus::parse(&status) {
                    package.approval_status = status;
                }
                Ok(package)
            })
            .collect()
    }
}
