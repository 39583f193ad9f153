//! Database connection management

use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};

use crate::utils::errors::StoreResult;

pub type DatabasePool = Pool<Sqlite>;

/// File name used when the configured path is a directory
pub const DEFAULT_DATABASE_FILE: &str = "sessions.db";

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub busy_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(path: impl AsRef<Path>, max_connections: u32) -> Self {
        Self {
            path: resolve_database_path(path.as_ref()),
            max_connections: max_connections.max(1),
            ..Self::default()
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data").join(DEFAULT_DATABASE_FILE),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Directories and extension-less paths get the default database file inside them
pub fn resolve_database_path(path: &Path) -> PathBuf {
    if path.is_dir() || path.extension().is_none() {
        path.join(DEFAULT_DATABASE_FILE)
    } else {
        path.to_path_buf()
    }
}

/// Create a new database connection pool
pub async fn create_pool(config: &DatabaseConfig) -> StoreResult<DatabasePool> {
    if let Some(parent) = config.path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(&config.path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(config.busy_timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(options)
        .await?;

    // Test the connection
    sqlx::query("SELECT 1").execute(&pool).await?;

    tracing::info!(path = %config.path.display(), "Database connection pool created successfully");
    Ok(pool)
}

/// Create the sessions table and its indexes
pub async fn init_schema(pool: &DatabasePool) -> StoreResult<()> {
    tracing::info!("Initializing session schema...");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY NOT NULL,
            stage TEXT NOT NULL,
            status TEXT NOT NULL,
            context TEXT NOT NULL,
            context_owners TEXT NOT NULL,
            history TEXT NOT NULL,
            errors TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            updated_at_us INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions (status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_updated ON sessions (updated_at_us)")
        .execute(pool)
        .await?;

    tracing::info!("Session schema ready");
    Ok(())
}

/// Check database health
pub async fn health_check(pool: &DatabasePool) -> StoreResult<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
