//! SQLite pool setup and schema migrations.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::info;

use ratekeeper_common::{RateKeeperError, Result};

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Map a driver error into the domain error.
pub(crate) fn db_err(e: sqlx::Error) -> RateKeeperError {
    RateKeeperError::DatabaseError(e.to_string())
}

/// Open a connection pool, creating the database file if it doesn't exist.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| RateKeeperError::ConfigurationError(format!("{}: {}", database_url, e)))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .map_err(db_err)?;

    Ok(pool)
}

/// Apply pending migrations.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!()
        .run(pool)
        .await
        .map_err(|e| RateKeeperError::DatabaseError(e.to_string()))?;
    info!("Database migrations applied");
    Ok(())
}

/// Open a pool and bring the schema up to date.
pub async fn create_db_pool(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let pool = connect(database_url, max_connections).await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Cheap round trip used by health checks.
pub async fn ping(pool: &SqlitePool) -> Result<()> {
    sqlx::query("SELECT 1").execute(pool).await.map_err(db_err)?;
    Ok(())
}

/// A migrated database in a temporary directory. The directory is removed
/// when the value is dropped, so keep it alive for the whole test.
#[cfg(any(test, feature = "test-utils"))]
pub struct TestDatabase {
    pub pool: SqlitePool,
    _dir: tempfile::TempDir,
}

#[cfg(any(test, feature = "test-utils"))]
impl TestDatabase {
    pub async fn new() -> Result<Self> {
        let dir = tempfile::tempdir()
            .map_err(|e| RateKeeperError::InternalError(e.to_string()))?;
        let url = format!("sqlite://{}", dir.path().join("ratekeeper.db").display());
        let pool = create_db_pool(&url, 8).await?;
        Ok(Self { pool, _dir: dir })
    }

    /// Make every write to `current_rates` for `pair` fail, simulating a
    /// storage failure in the middle of a resolve transaction.
    pub async fn fail_current_rate_writes(
        &self,
        pair: &ratekeeper_common::CurrencyPair,
    ) -> Result<()> {
        for event in ["INSERT", "UPDATE"] {
            let sql = format!(
                "CREATE TRIGGER reject_{event}_{from}_{to} BEFORE {event} ON current_rates \
                 WHEN NEW.from_currency = '{from}' AND NEW.to_currency = '{to}' \
                 BEGIN SELECT RAISE(ABORT, 'simulated storage failure'); END",
                event = event,
                from = pair.from.code(),
                to = pair.to.code(),
            );
            sqlx::query(&sql).execute(&self.pool).await.map_err(db_err)?;
        }
        Ok(())
    }

    /// Make every attempt to mark an update `ERROR` fail.
    pub async fn fail_update_error_writes(&self) -> Result<()> {
        sqlx::query(
            "CREATE TRIGGER reject_error_status BEFORE UPDATE ON exchange_rate_updates \
             WHEN NEW.status = 'ERROR' \
             BEGIN SELECT RAISE(ABORT, 'simulated storage failure'); END",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
