//! Update ledger: one row per attempt to refresh a pair's rate.
//!
//! The ledger owns the `Updating -> Done | Error` state machine. A partial
//! unique index over pending rows guarantees that a pair never has two
//! `Updating` rows, which is what lets concurrent callers of
//! [`UpdateLedger::get_or_create`] converge on a single id without any
//! in-process locking.

use std::str::FromStr;

use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::{debug, instrument, warn};

use ratekeeper_common::{
    now, Currency, CurrencyPair, ExchangeRateUpdate, PendingUpdate, RateKeeperError, Result,
    Timestamp, UpdateId, UpdateStatus,
};

use crate::db::db_err;

/// How many times `get_or_create` re-runs when the pending row it collided
/// with is resolved before it can be read back.
const GET_OR_CREATE_ATTEMPTS: usize = 3;

const INSERT_IF_ABSENT_SQL: &str = r#"
INSERT INTO exchange_rate_updates (id, from_currency, to_currency, status, created_at)
VALUES (?1, ?2, ?3, 'UPDATING', ?4)
ON CONFLICT DO NOTHING
"#;

const SELECT_PENDING_ID_SQL: &str = r#"
SELECT id FROM exchange_rate_updates
WHERE from_currency = ?1 AND to_currency = ?2 AND status = 'UPDATING'
"#;

const SELECT_UPDATE_SQL: &str = r#"
SELECT id, from_currency, to_currency, status, rate_value, resolved_at, created_at
FROM exchange_rate_updates
WHERE id = ?1
"#;

const LIST_PENDING_SQL: &str = r#"
SELECT id, from_currency, to_currency
FROM exchange_rate_updates
WHERE status = 'UPDATING'
ORDER BY created_at, rowid
LIMIT ?1
"#;

const RESOLVE_DONE_SQL: &str = r#"
UPDATE exchange_rate_updates
SET status = 'DONE', rate_value = ?2, resolved_at = ?3
WHERE id = ?1 AND status = 'UPDATING'
"#;

const RESOLVE_ERROR_SQL: &str = r#"
UPDATE exchange_rate_updates
SET status = 'ERROR'
WHERE id = ?1 AND status = 'UPDATING'
"#;

const SELECT_STATUS_SQL: &str = "SELECT status FROM exchange_rate_updates WHERE id = ?1";

/// Storage for update attempts.
#[derive(Debug, Clone)]
pub struct UpdateLedger {
    pool: SqlitePool,
}

impl UpdateLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Return the id of the pending update for `pair`, creating one if none
    /// exists.
    ///
    /// The insert is a no-op when the pair already has an `Updating` row; the
    /// follow-up read then returns whichever row won. If that row is resolved
    /// between the two statements the read comes back empty and the whole
    /// operation runs again.
    #[instrument(skip(self), fields(pair = %pair))]
    pub async fn get_or_create(&self, pair: &CurrencyPair) -> Result<UpdateId> {
        for attempt in 1..=GET_OR_CREATE_ATTEMPTS {
            let candidate = UpdateId::new();

            let inserted = sqlx::query(INSERT_IF_ABSENT_SQL)
                .bind(candidate.to_string())
                .bind(pair.from.code())
                .bind(pair.to.code())
                .bind(now())
                .execute(&self.pool)
                .await
                .map_err(db_err)?
                .rows_affected();

            let winner: Option<String> = sqlx::query_scalar(SELECT_PENDING_ID_SQL)
                .bind(pair.from.code())
                .bind(pair.to.code())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

            if let Some(id) = winner {
                let id = parse_id(&id)?;
                debug!(update_id = %id, created = inserted == 1, "Pending update resolved for pair");
                return Ok(id);
            }

            warn!(attempt, "Pending update resolved before it could be read, retrying");
        }

        Err(RateKeeperError::InternalError(format!(
            "could not obtain a pending update for {} after {} attempts",
            pair, GET_OR_CREATE_ATTEMPTS
        )))
    }

    /// Get an update by id.
    pub async fn get(&self, id: UpdateId) -> Result<ExchangeRateUpdate> {
        let row = sqlx::query(SELECT_UPDATE_SQL)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| RateKeeperError::UpdateNotFound(id.to_string()))?;

        update_from_row(&row)
    }

    /// Up to `limit` pending updates, oldest first.
    pub async fn list_pending(&self, limit: u32) -> Result<Vec<PendingUpdate>> {
        let rows = sqlx::query(LIST_PENDING_SQL)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.iter()
            .map(|row| {
                Ok(PendingUpdate {
                    id: parse_id(&get_column::<String>(row, "id")?)?,
                    pair: pair_from_row(row)?,
                })
            })
            .collect()
    }

    /// Mark an update done. Must run inside the transaction that also
    /// writes the current rate.
    pub async fn resolve_done(
        &self,
        conn: &mut SqliteConnection,
        id: UpdateId,
        rate: Decimal,
        resolved_at: Timestamp,
    ) -> Result<()> {
        let affected = sqlx::query(RESOLVE_DONE_SQL)
            .bind(id.to_string())
            .bind(rate.to_string())
            .bind(resolved_at)
            .execute(&mut *conn)
            .await
            .map_err(db_err)?
            .rows_affected();

        if affected == 0 {
            return Err(self.transition_error(&mut *conn, id, UpdateStatus::Done).await);
        }
        Ok(())
    }

    /// Mark an update failed. Terminal; no rate is recorded.
    #[instrument(skip(self), fields(update_id = %id))]
    pub async fn resolve_error(&self, id: UpdateId) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;

        let affected = sqlx::query(RESOLVE_ERROR_SQL)
            .bind(id.to_string())
            .execute(&mut *conn)
            .await
            .map_err(db_err)?
            .rows_affected();

        if affected == 0 {
            return Err(self.transition_error(&mut conn, id, UpdateStatus::Error).await);
        }
        Ok(())
    }

    /// Explain why a guarded status update touched no row.
    async fn transition_error(
        &self,
        conn: &mut SqliteConnection,
        id: UpdateId,
        to: UpdateStatus,
    ) -> RateKeeperError {
        let status: Option<String> = match sqlx::query_scalar(SELECT_STATUS_SQL)
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await
        {
            Ok(status) => status,
            Err(e) => return db_err(e),
        };

        match status.map(|s| UpdateStatus::from_str(&s)) {
            None => RateKeeperError::UpdateNotFound(id.to_string()),
            Some(Ok(from)) if !from.can_transition_to(to) => RateKeeperError::InvalidTransition {
                id: id.to_string(),
                from,
                to,
            },
            Some(Ok(from)) => RateKeeperError::InternalError(format!(
                "update {} in {} was not moved to {}",
                id, from, to
            )),
            Some(Err(e)) => RateKeeperError::DatabaseError(e),
        }
    }
}

fn get_column<T>(row: &SqliteRow, column: &str) -> Result<T>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column).map_err(db_err)
}

fn parse_id(raw: &str) -> Result<UpdateId> {
    UpdateId::parse(raw)
        .map_err(|e| RateKeeperError::DatabaseError(format!("corrupt update id {:?}: {}", raw, e)))
}

/// Parse a stored rate. Rates are written with `Decimal::to_string`, so the
/// exact scale comes back unchanged.
pub(crate) fn parse_rate(raw: &str) -> Result<Decimal> {
    Decimal::from_str_exact(raw)
        .map_err(|e| RateKeeperError::DatabaseError(format!("corrupt rate {:?}: {}", raw, e)))
}

pub(crate) fn pair_from_row(row: &SqliteRow) -> Result<CurrencyPair> {
    Ok(CurrencyPair::new(
        Currency::new(get_column::<String>(row, "from_currency")?),
        Currency::new(get_column::<String>(row, "to_currency")?),
    ))
}

fn update_from_row(row: &SqliteRow) -> Result<ExchangeRateUpdate> {
    let status: String = get_column(row, "status")?;
    let rate: Option<String> = get_column(row, "rate_value")?;

    Ok(ExchangeRateUpdate {
        id: parse_id(&get_column::<String>(row, "id")?)?,
        pair: pair_from_row(row)?,
        status: UpdateStatus::from_str(&status).map_err(RateKeeperError::DatabaseError)?,
        rate: rate.as_deref().map(parse_rate).transpose()?,
        resolved_at: get_column(row, "resolved_at")?,
        created_at: get_column(row, "created_at")?,
    })
}
