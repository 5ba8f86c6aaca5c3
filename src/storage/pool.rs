//! # Database Connection Pool Management
//!
//! Provides SQLite connection pool creation for the durable document store.

use crate::config::StorageConfig;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Pool, Sqlite,
};
use std::{str::FromStr, time::Duration};

use super::{StorageError, StorageResult};

/// Type alias for the database connection pool
pub type DbPool = Pool<Sqlite>;

const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a database connection pool with the specified configuration
pub async fn create_pool(config: &StorageConfig) -> StorageResult<DbPool> {
    validate_config(config)?;

    // Every connection to `:memory:` opens its own database.
    let in_memory = config.is_in_memory();
    let max_connections = if in_memory { 1 } else { config.max_connections };
    let min_connections = if in_memory { 1 } else { config.min_connections };

    let pool_options = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .min_connections(min_connections)
        .acquire_timeout(config.connect_timeout())
        .test_before_acquire(true);

    let pool_options = match config.idle_timeout() {
        Some(idle_timeout) if !in_memory => pool_options.idle_timeout(idle_timeout),
        _ => pool_options.idle_timeout(None).max_lifetime(None),
    };

    let connect_options = SqliteConnectOptions::from_str(&config.url)
        .map_err(|e| {
            StorageError::database(
                e,
                format!("Invalid SQLite connection string: {}", sanitize_url(&config.url)),
            )
        })?
        .create_if_missing(true)
        .busy_timeout(SQLITE_BUSY_TIMEOUT)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = pool_options.connect_with(connect_options).await.map_err(|e| {
        tracing::error!(
            error = %e,
            url = %sanitize_url(&config.url),
            busy_timeout_ms = SQLITE_BUSY_TIMEOUT.as_millis() as u64,
            "Failed to create SQLite database pool"
        );
        StorageError::database(
            e,
            format!("Failed to connect to database: {}", sanitize_url(&config.url)),
        )
    })?;

    tracing::info!(
        database_type = "sqlite",
        in_memory,
        max_connections,
        min_connections,
        connect_timeout_ms = config.connect_timeout().as_millis() as u64,
        "Database connection pool created"
    );

    Ok(pool)
}

/// Validate database configuration
fn validate_config(config: &StorageConfig) -> StorageResult<()> {
    if config.max_connections == 0 {
        return Err(StorageError::Config("max_connections must be greater than 0".to_string()));
    }

    if config.min_connections > config.max_connections {
        return Err(StorageError::Config(
            "min_connections cannot be greater than max_connections".to_string(),
        ));
    }

    if config.url.is_empty() {
        return Err(StorageError::Config("database URL cannot be empty".to_string()));
    }

    if !config.url.starts_with("sqlite:") {
        return Err(StorageError::Config("database URL must start with 'sqlite:'".to_string()));
    }

    Ok(())
}

/// Sanitize database URL for logging (remove credentials)
pub fn sanitize_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) if parsed.password().is_some() || !parsed.username().is_empty() => format!(
            "{}://***:***@{}{}",
            parsed.scheme(),
            parsed.host_str().unwrap_or("unknown"),
            parsed.path()
        ),
        _ => url.to_string(),
    }
}

/// Get pool statistics for monitoring
pub fn get_pool_stats(pool: &DbPool) -> PoolStats {
    PoolStats { size: pool.size(), idle: pool.num_idle() }
}

/// Pool statistics for monitoring
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// Total connections in the pool
    pub size: u32,
    /// Number of idle connections
    pub idle: usize,
}

impl PoolStats {
    /// Get the number of active connections
    pub fn active(&self) -> u32 {
        self.size.saturating_sub(self.idle as u32)
    }

    /// Check if the pool is healthy (has available connections)
    pub fn is_healthy(&self) -> bool {
        self.size > 0
    }
}
