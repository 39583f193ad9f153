//! Session repository implementation

use std::path::Path;
use std::str::FromStr;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::{QueryBuilder, Sqlite};

use crate::database::connection::{create_pool, init_schema, DatabaseConfig, DatabasePool};
use crate::models::{Session, SessionFilter, SessionStatus, SessionSummary, Stage};
use crate::state::storage::SessionStore;
use crate::utils::errors::{PersistenceError, StoreResult};
use crate::utils::helpers;
use crate::utils::logging::log_store_operation;

const SESSION_COLUMNS: &str =
    "id, stage, status, context, context_owners, history, errors, created_at, updated_at";

const SUMMARY_COLUMNS: &str = "id, stage, status, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    id: String,
    stage: String,
    status: String,
    context: String,
    context_owners: String,
    history: String,
    errors: String,
    created_at: String,
    updated_at: String,
}

#[derive(Debug, sqlx::FromRow)]
struct SummaryRow {
    id: String,
    stage: String,
    status: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SessionRow> for Session {
    type Error = PersistenceError;

    fn try_from(row: SessionRow) -> StoreResult<Self> {
        Ok(Session {
            stage: parse_stage(&row.id, &row.stage)?,
            status: parse_status(&row.id, &row.status)?,
            context: parse_json(&row.id, "context", &row.context)?,
            context_owners: parse_json(&row.id, "context_owners", &row.context_owners)?,
            history: parse_json(&row.id, "history", &row.history)?,
            errors: parse_json(&row.id, "errors", &row.errors)?,
            created_at: parse_timestamp(&row.id, &row.created_at)?,
            updated_at: parse_timestamp(&row.id, &row.updated_at)?,
            id: row.id,
        })
    }
}

impl TryFrom<SummaryRow> for SessionSummary {
    type Error = PersistenceError;

    fn try_from(row: SummaryRow) -> StoreResult<Self> {
        Ok(SessionSummary {
            stage: parse_stage(&row.id, &row.stage)?,
            status: parse_status(&row.id, &row.status)?,
            created_at: parse_timestamp(&row.id, &row.created_at)?,
            updated_at: parse_timestamp(&row.id, &row.updated_at)?,
            id: row.id,
        })
    }
}

fn parse_stage(id: &str, value: &str) -> StoreResult<Stage> {
    Stage::from_str(value).map_err(|e| PersistenceError::Corrupt(format!("session {}: {}", id, e)))
}

fn parse_status(id: &str, value: &str) -> StoreResult<SessionStatus> {
    SessionStatus::from_str(value).map_err(|e| PersistenceError::Corrupt(format!("session {}: {}", id, e)))
}

fn parse_timestamp(id: &str, value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| PersistenceError::Corrupt(format!("session {}: bad timestamp {:?}: {}", id, value, e)))
}

fn parse_json<T: DeserializeOwned>(id: &str, column: &str, value: &str) -> StoreResult<T> {
    serde_json::from_str(value)
        .map_err(|e| PersistenceError::Corrupt(format!("session {}: bad {} column: {}", id, column, e)))
}

/// Smallest whole microsecond not earlier than `timestamp`
fn ceil_micros(timestamp: DateTime<Utc>) -> i64 {
    let micros = helpers::to_micros(timestamp);
    if timestamp.timestamp_subsec_nanos() % 1_000 == 0 {
        micros
    } else {
        micros + 1
    }
}

/// SQLite-backed session store
#[derive(Clone, Debug)]
pub struct SessionRepository {
    pool: DatabasePool,
}

impl SessionRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Open the database at `path`, creating the file and schema if needed
    pub async fn open(path: impl AsRef<Path>, max_connections: u32) -> StoreResult<Self> {
        let config = DatabaseConfig::new(path, max_connections);
        let pool = create_pool(&config).await?;
        init_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    /// Count stored sessions
    pub async fn count(&self) -> StoreResult<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sessions")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    async fn upsert(&self, session: &Session) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, stage, status, context, context_owners, history, errors, created_at, updated_at, updated_at_us)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                stage = excluded.stage,
                status = excluded.status,
                context = excluded.context,
                context_owners = excluded.context_owners,
                history = excluded.history,
                errors = excluded.errors,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                updated_at_us = excluded.updated_at_us
            "#,
        )
        .bind(&session.id)
        .bind(session.stage.as_str())
        .bind(session.status.as_str())
        .bind(serde_json::to_string(&session.context)?)
        .bind(serde_json::to_string(&session.context_owners)?)
        .bind(serde_json::to_string(&session.history)?)
        .bind(serde_json::to_string(&session.errors)?)
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .bind(helpers::to_micros(session.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl SessionStore for SessionRepository {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn save(&self, session: &Session) -> StoreResult<()> {
        let started = Instant::now();
        let result = self.upsert(session).await;
        log_store_operation(
            self.backend_name(),
            "save",
            Some(&session.id),
            started.elapsed().as_millis() as u64,
            result.is_ok(),
        );
        result
    }

    async fn load(&self, id: &str) -> StoreResult<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM sessions WHERE id = ?1",
            SESSION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Session::try_from).transpose()
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn query(&self, filter: &SessionFilter) -> StoreResult<Vec<SessionSummary>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM sessions WHERE 1 = 1", SUMMARY_COLUMNS));

        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(stage) = filter.stage {
            builder.push(" AND stage = ").push_bind(stage.as_str());
        }
        if let Some(after) = filter.updated_after {
            builder.push(" AND updated_at_us >= ").push_bind(ceil_micros(after));
        }
        if let Some(before) = filter.updated_before {
            builder.push(" AND updated_at_us < ").push_bind(ceil_micros(before));
        }
        if let Some(cursor) = &filter.after {
            let at = helpers::to_micros(cursor.updated_at);
            builder
                .push(" AND (updated_at_us < ")
                .push_bind(at)
                .push(" OR (updated_at_us = ")
                .push_bind(at)
                .push(" AND id > ")
                .push_bind(cursor.id.clone())
                .push("))");
        }

        builder.push(" ORDER BY updated_at_us DESC, id ASC");

        match filter.limit {
            Some(limit) => {
                builder.push(" LIMIT ").push_bind(limit as i64);
            }
            // SQLite only accepts OFFSET after a LIMIT; -1 means unbounded
            None if filter.offset > 0 => {
                builder.push(" LIMIT -1");
            }
            None => {}
        }
        if filter.offset > 0 {
            builder.push(" OFFSET ").push_bind(filter.offset as i64);
        }

        let rows = builder
            .build_query_as::<SummaryRow>()
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(SessionSummary::try_from).collect()
    }
}
