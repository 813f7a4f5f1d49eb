//! Persistence layer: SQLite via sqlx.
//!
//! Connection pool management, idempotent migrations, row models and
//! repositories. The database file is shared with the parent process, so
//! WAL mode and a generous busy timeout are non-negotiable.

pub mod migrations;
pub mod models;
pub mod repositories;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};

use crate::Result;

/// Database connection pool type alias.
pub type DbPool = Pool<Sqlite>;

/// Default connection pool size.
const DEFAULT_POOL_SIZE: u32 = 5;

/// Busy timeout; the parent process writes to the same file.
const BUSY_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Initialize the database connection pool.
///
/// WAL journal mode for concurrent reads during writes, NORMAL synchronous
/// mode, foreign keys on, and the file created when missing.
pub async fn init_pool(database_url: &str) -> Result<DbPool> {
    let connect_options = SqliteConnectOptions::from_str(database_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT)
        .foreign_keys(true)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(DEFAULT_POOL_SIZE)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(connect_options)
        .await?;

    tracing::info!(url = database_url, "database pool initialized (WAL mode)");

    Ok(pool)
}
