//! Repository: the only place that writes the ledger and the current rate
//! store, and the only owner of the transaction spanning both.

use rust_decimal::Decimal;
use sqlx::sqlite::SqlitePool;
use tracing::{info, instrument};

use ratekeeper_common::{
    now, CurrencyPair, PendingUpdate, RateReading, Result, Timestamp, UpdateId,
};

use crate::current_rate::CurrentRateStore;
use crate::db::{self, db_err};
use crate::updates::UpdateLedger;

/// Coordinates rate updates across the ledger and the snapshot table.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
    updates: UpdateLedger,
    rates: CurrentRateStore,
}

impl Repository {
    /// Create a repository over an already migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            updates: UpdateLedger::new(pool.clone()),
            rates: CurrentRateStore::new(pool.clone()),
            pool,
        }
    }

    /// Round trip to the database.
    pub async fn ping(&self) -> Result<()> {
        db::ping(&self.pool).await
    }

    /// Start (or join) the pending update for `pair`. Never blocks on the
    /// rate source.
    pub async fn start_update(&self, pair: &CurrencyPair) -> Result<UpdateId> {
        self.updates.get_or_create(pair).await
    }

    /// Rate and time of an update; both unset until it is `Done`.
    pub async fn get_update(&self, id: UpdateId) -> Result<RateReading> {
        Ok(self.updates.get(id).await?.reading())
    }

    /// Latest resolved rate for `pair`; both unset if it never resolved.
    pub async fn get_last_rate(&self, pair: &CurrencyPair) -> Result<RateReading> {
        Ok(self
            .rates
            .get(pair)
            .await?
            .map(RateReading::from)
            .unwrap_or_default())
    }

    /// Pending updates for the worker, oldest first.
    pub async fn pending_updates(&self, limit: u32) -> Result<Vec<PendingUpdate>> {
        self.updates.list_pending(limit).await
    }

    /// Record that the rate source failed for this update.
    pub async fn fail_update(&self, id: UpdateId) -> Result<()> {
        self.updates.resolve_error(id).await
    }

    /// Resolve an update and refresh the pair's current rate atomically.
    ///
    /// On any error the transaction is rolled back when it is dropped, so
    /// the update stays `Updating` and the snapshot keeps its old value.
    #[instrument(skip(self), fields(update_id = %id, pair = %pair, rate = %rate))]
    pub async fn resolve(
        &self,
        id: UpdateId,
        pair: &CurrencyPair,
        rate: Decimal,
    ) -> Result<Timestamp> {
        let resolved_at = now();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        self.updates
            .resolve_done(&mut tx, id, rate, resolved_at)
            .await?;
        self.rates.upsert(&mut tx, pair, rate, resolved_at).await?;

        tx.commit().await.map_err(db_err)?;

        info!(resolved_at = %resolved_at, "Rate update resolved");
        Ok(resolved_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TestDatabase;
    use ratekeeper_common::{Currency, RateKeeperError, UpdateStatus};
    use rust_decimal_macros::dec;
    use std::collections::HashSet;
    use tokio::task::JoinSet;

    fn usd_eur() -> CurrencyPair {
        CurrencyPair::new(Currency::usd(), Currency::eur())
    }

    async fn setup() -> (TestDatabase, Repository) {
        let db = TestDatabase::new().await.unwrap();
        let repository = Repository::new(db.pool.clone());
        (db, repository)
    }

    #[tokio::test]
    async fn test_concurrent_start_update_returns_one_id() {
        let (_db, repository) = setup().await;
        let existing = repository.start_update(&usd_eur()).await.unwrap();

        let mut tasks = JoinSet::new();
        for _ in 0..10 {
            let repository = repository.clone();
            tasks.spawn(async move { repository.start_update(&usd_eur()).await });
        }

        let mut ids = HashSet::new();
        while let Some(result) = tasks.join_next().await {
            ids.insert(result.unwrap().unwrap());
        }
        assert_eq!(ids, HashSet::from([existing]));
    }

    #[tokio::test]
    async fn test_resolve_updates_ledger_and_snapshot() {
        let (_db, repository) = setup().await;
        let id = repository.start_update(&usd_eur()).await.unwrap();

        let at = repository.resolve(id, &usd_eur(), dec!(0.9215)).await.unwrap();

        let expected = RateReading::resolved(dec!(0.9215), at);
        assert_eq!(repository.get_update(id).await.unwrap(), expected);
        assert_eq!(repository.get_last_rate(&usd_eur()).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_pending_update_reads_empty() {
        let (_db, repository) = setup().await;
        let id = repository.start_update(&usd_eur()).await.unwrap();

        assert_eq!(repository.get_update(id).await.unwrap(), RateReading::empty());
    }

    #[tokio::test]
    async fn test_failed_update_reads_empty() {
        let (_db, repository) = setup().await;
        let id = repository.start_update(&usd_eur()).await.unwrap();
        repository.fail_update(id).await.unwrap();

        assert!(repository.get_update(id).await.unwrap().is_empty());
        assert!(repository.get_last_rate(&usd_eur()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_last_rate_for_unresolved_pair_is_empty() {
        let (_db, repository) = setup().await;

        let reading = repository.get_last_rate(&usd_eur()).await.unwrap();
        assert_eq!(reading, RateReading::empty());
    }

    #[tokio::test]
    async fn test_unknown_update_is_not_found() {
        let (_db, repository) = setup().await;

        let err = repository.get_update(UpdateId::new()).await.unwrap_err();
        assert!(matches!(err, RateKeeperError::UpdateNotFound(_)));
    }

    #[tokio::test]
    async fn test_last_rate_follows_latest_success() {
        let (_db, repository) = setup().await;

        let first = repository.start_update(&usd_eur()).await.unwrap();
        let first_at = repository.resolve(first, &usd_eur(), dec!(0.91)).await.unwrap();

        let second = repository.start_update(&usd_eur()).await.unwrap();
        assert_ne!(first, second);
        let second_at = repository.resolve(second, &usd_eur(), dec!(0.93)).await.unwrap();

        let third = repository.start_update(&usd_eur()).await.unwrap();
        repository.fail_update(third).await.unwrap();

        assert_eq!(
            repository.get_update(first).await.unwrap(),
            RateReading::resolved(dec!(0.91), first_at)
        );
        assert_eq!(
            repository.get_last_rate(&usd_eur()).await.unwrap(),
            RateReading::resolved(dec!(0.93), second_at)
        );
    }

    #[tokio::test]
    async fn test_storage_failure_rolls_back_both_tables() {
        let (db, repository) = setup().await;
        let ledger = UpdateLedger::new(db.pool.clone());

        let earlier = repository.start_update(&usd_eur()).await.unwrap();
        repository.resolve(earlier, &usd_eur(), dec!(0.90)).await.unwrap();

        let id = repository.start_update(&usd_eur()).await.unwrap();
        let ledger_before = ledger.get(id).await.unwrap();
        let snapshot_before = repository.get_last_rate(&usd_eur()).await.unwrap();

        db.fail_current_rate_writes(&usd_eur()).await.unwrap();
        let err = repository.resolve(id, &usd_eur(), dec!(0.95)).await.unwrap_err();
        assert!(matches!(err, RateKeeperError::DatabaseError(_)));

        let ledger_after = ledger.get(id).await.unwrap();
        assert_eq!(ledger_after, ledger_before);
        assert_eq!(ledger_after.status, UpdateStatus::Updating);
        assert_eq!(repository.get_last_rate(&usd_eur()).await.unwrap(), snapshot_before);

        // Still pending, so the next worker cycle picks it up again.
        let pending = repository.pending_updates(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
    }

    #[tokio::test]
    async fn test_resolve_twice_is_rejected_without_touching_snapshot() {
        let (_db, repository) = setup().await;
        let id = repository.start_update(&usd_eur()).await.unwrap();
        let at = repository.resolve(id, &usd_eur(), dec!(0.92)).await.unwrap();

        let err = repository.resolve(id, &usd_eur(), dec!(0.99)).await.unwrap_err();
        assert!(matches!(err, RateKeeperError::InvalidTransition { .. }));
        assert_eq!(
            repository.get_last_rate(&usd_eur()).await.unwrap(),
            RateReading::resolved(dec!(0.92), at)
        );
    }
}
