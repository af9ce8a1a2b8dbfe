//! Current rate store: the latest resolved rate per pair.

use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use sqlx::Row;

use ratekeeper_common::{CurrencyPair, CurrentRate, Result, Timestamp};

use crate::db::db_err;
use crate::updates::{pair_from_row, parse_rate};

const SELECT_RATE_SQL: &str = r#"
SELECT from_currency, to_currency, rate_value, resolved_at FROM current_rates
WHERE from_currency = ?1 AND to_currency = ?2
"#;

const UPSERT_RATE_SQL: &str = r#"
INSERT INTO current_rates (from_currency, to_currency, rate_value, resolved_at)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT (from_currency, to_currency)
DO UPDATE SET rate_value = excluded.rate_value, resolved_at = excluded.resolved_at
"#;

/// Snapshot of the last good rate for each pair. Overwritten, never versioned.
#[derive(Debug, Clone)]
pub struct CurrentRateStore {
    pool: SqlitePool,
}

impl CurrentRateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// `None` when the pair has never resolved.
    pub async fn get(&self, pair: &CurrencyPair) -> Result<Option<CurrentRate>> {
        let row = sqlx::query(SELECT_RATE_SQL)
            .bind(pair.from.code())
            .bind(pair.to.code())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let rate: String = row.try_get("rate_value").map_err(db_err)?;
        Ok(Some(CurrentRate {
            pair: pair_from_row(&row)?,
            rate: parse_rate(&rate)?,
            resolved_at: row.try_get("resolved_at").map_err(db_err)?,
        }))
    }

    /// Insert or overwrite the rate for `pair`. Runs inside the resolve
    /// transaction.
    pub async fn upsert(
        &self,
        conn: &mut SqliteConnection,
        pair: &CurrencyPair,
        rate: Decimal,
        resolved_at: Timestamp,
    ) -> Result<()> {
        sqlx::query(UPSERT_RATE_SQL)
            .bind(pair.from.code())
            .bind(pair.to.code())
            .bind(rate.to_string())
            .bind(resolved_at)
            .execute(conn)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}
