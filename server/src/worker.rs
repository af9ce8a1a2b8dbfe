//! Background worker that resolves pending rate updates.

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use ratekeeper_common::{PendingUpdate, RateKeeperError};
use ratekeeper_fx::RateSource;
use ratekeeper_ledger::Repository;

use crate::config::WorkerConfig;
use crate::metrics::{SharedMetrics, WorkerMetrics};
use crate::state::WorkerState;

/// A storage failure stopped the batch. Rows before it stay applied.
#[derive(Debug, Error)]
#[error("update batch aborted after {processed} rows: {source}")]
pub struct BatchAborted {
    /// Rows processed before the failure.
    pub processed: usize,
    pub source: RateKeeperError,
}

enum RowOutcome {
    Resolved,
    ProviderFailed,
    Skipped,
}

/// Pulls pending updates, asks the rate source, and records the outcome.
#[derive(Clone)]
pub struct RateUpdateWorker {
    repository: Repository,
    source: Arc<dyn RateSource>,
    config: WorkerConfig,
    metrics: SharedMetrics,
    state: Arc<RwLock<WorkerState>>,
}

impl RateUpdateWorker {
    pub fn new(repository: Repository, source: Arc<dyn RateSource>, config: WorkerConfig) -> Self {
        Self {
            repository,
            source,
            config,
            metrics: Arc::new(WorkerMetrics::new()),
            state: Arc::new(RwLock::new(WorkerState::Starting)),
        }
    }

    /// Get the worker metrics.
    pub fn metrics(&self) -> SharedMetrics {
        self.metrics.clone()
    }

    /// Get the current worker state.
    pub fn state(&self) -> WorkerState {
        *self.state.read()
    }

    /// Run one batch. Rows are handled one at a time, in ledger order.
    ///
    /// Returns the number of rows processed, counting both resolved rows
    /// and rows whose rate source call failed.
    #[instrument(skip(self), fields(fetch_size = self.config.fetch_size))]
    pub async fn execute_update(&self) -> Result<usize, BatchAborted> {
        self.metrics.tick();

        let pending = self
            .repository
            .pending_updates(self.config.fetch_size)
            .await
            .map_err(|source| self.abort(0, source))?;

        let mut processed = 0;
        for update in pending {
            match self.process(&update).await {
                Ok(RowOutcome::Resolved) | Ok(RowOutcome::ProviderFailed) => processed += 1,
                Ok(RowOutcome::Skipped) => {}
                Err(source) => return Err(self.abort(processed, source)),
            }
        }

        Ok(processed)
    }

    /// Tick on the configured interval until `shutdown` fires. A tick that
    /// made progress is followed immediately by another one.
    pub async fn run(&self, mut shutdown: mpsc::Receiver<()>) {
        *self.state.write() = WorkerState::Running;
        info!(
            source = self.source.name(),
            tick_interval = ?self.config.tick_interval,
            fetch_size = self.config.fetch_size,
            "Rate update worker started"
        );

        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        'timer: loop {
            tokio::select! {
                _ = shutdown.recv() => break 'timer,
                _ = interval.tick() => {}
            }

            loop {
                let progressed = match self.execute_update().await {
                    Ok(0) => false,
                    Ok(processed) => {
                        info!(processed, metrics = ?self.metrics.snapshot(), "Update batch complete");
                        true
                    }
                    Err(e) => {
                        error!(processed = e.processed, error = %e.source, "Update batch aborted");
                        e.processed > 0
                    }
                };

                match shutdown.try_recv() {
                    Err(TryRecvError::Empty) => {}
                    Ok(()) | Err(TryRecvError::Disconnected) => break 'timer,
                }
                if !progressed {
                    break;
                }
            }
        }

        *self.state.write() = WorkerState::ShuttingDown;
        info!(metrics = ?self.metrics.snapshot(), "Rate update worker stopping");
        *self.state.write() = WorkerState::Stopped;
    }

    #[instrument(skip(self), fields(update_id = %update.id, pair = %update.pair))]
    async fn process(&self, update: &PendingUpdate) -> Result<RowOutcome, RateKeeperError> {
        let rate = match self.source.get_rate(&update.pair).await {
            Ok(rate) => rate,
            Err(e) => {
                warn!(source = self.source.name(), error = %e, "Rate source failed");
                self.metrics.provider_failed();
                return match self.repository.fail_update(update.id).await {
                    Ok(()) => Ok(RowOutcome::ProviderFailed),
                    Err(e) => self.not_pending(e),
                };
            }
        };

        match self.repository.resolve(update.id, &update.pair, rate).await {
            Ok(_) => {
                debug!(rate = %rate, "Update resolved");
                self.metrics.update_resolved();
                Ok(RowOutcome::Resolved)
            }
            Err(e) => self.not_pending(e),
        }
    }

    /// A row resolved elsewhere is skipped; any other error is a storage
    /// failure and aborts the batch.
    fn not_pending(&self, e: RateKeeperError) -> Result<RowOutcome, RateKeeperError> {
        match e {
            RateKeeperError::InvalidTransition { .. } | RateKeeperError::UpdateNotFound(_) => {
                warn!(error = %e, "Update no longer pending, skipping");
                self.metrics.update_skipped();
                Ok(RowOutcome::Skipped)
            }
            e => Err(e),
        }
    }

    fn abort(&self, processed: usize, source: RateKeeperError) -> BatchAborted {
        self.metrics.storage_failed();
        BatchAborted { processed, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ratekeeper_common::{Currency, CurrencyPair, RateReading, UpdateStatus};
    use ratekeeper_fx::{FxResult, MockRateSource};
    use ratekeeper_ledger::{TestDatabase, UpdateLedger};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn pair(from: Currency, to: Currency) -> CurrencyPair {
        CurrencyPair::new(from, to)
    }

    fn worker(db: &TestDatabase, source: Arc<dyn RateSource>, fetch_size: u32) -> RateUpdateWorker {
        RateUpdateWorker::new(
            Repository::new(db.pool.clone()),
            source,
            WorkerConfig {
                tick_interval: Duration::from_secs(3600),
                fetch_size,
            },
        )
    }

    #[tokio::test]
    async fn test_provider_failure_does_not_block_batch() {
        let db = TestDatabase::new().await.unwrap();
        let repository = Repository::new(db.pool.clone());
        let ledger = UpdateLedger::new(db.pool.clone());

        let ab = pair(Currency::usd(), Currency::eur());
        let bc = pair(Currency::eur(), Currency::mxn());
        let cd = pair(Currency::mxn(), Currency::gbp());

        let source = Arc::new(MockRateSource::new());
        source.fail_pair(ab.clone(), "upstream timeout");
        source.set_rate(bc.clone(), dec!(1.10));
        source.set_rate(cd.clone(), dec!(2.00));

        let ab_id = repository.start_update(&ab).await.unwrap();
        let bc_id = repository.start_update(&bc).await.unwrap();
        let cd_id = repository.start_update(&cd).await.unwrap();

        let worker = worker(&db, source.clone(), 10);
        assert_eq!(worker.execute_update().await.unwrap(), 3);
        assert_eq!(source.calls(), 3);

        assert_eq!(ledger.get(ab_id).await.unwrap().status, UpdateStatus::Error);
        assert!(repository.get_last_rate(&ab).await.unwrap().is_empty());

        for (id, pair, rate) in [(bc_id, &bc, dec!(1.10)), (cd_id, &cd, dec!(2.00))] {
            let update = ledger.get(id).await.unwrap();
            assert_eq!(update.status, UpdateStatus::Done);
            let resolved_at = update.resolved_at.unwrap();
            assert_eq!(
                repository.get_last_rate(pair).await.unwrap(),
                RateReading::resolved(rate, resolved_at)
            );
        }

        let snapshot = worker.metrics().snapshot();
        assert_eq!(snapshot.resolved, 2);
        assert_eq!(snapshot.provider_failures, 1);

        // Nothing left.
        assert_eq!(worker.execute_update().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_storage_failure_aborts_rest_of_batch() {
        let db = TestDatabase::new().await.unwrap();
        let repository = Repository::new(db.pool.clone());
        let ledger = UpdateLedger::new(db.pool.clone());

        let pairs = [
            pair(Currency::usd(), Currency::eur()),
            pair(Currency::usd(), Currency::mxn()),
            pair(Currency::usd(), Currency::gbp()),
        ];
        let source = Arc::new(MockRateSource::new());
        let mut ids = Vec::new();
        for (i, p) in pairs.iter().enumerate() {
            source.set_rate(p.clone(), Decimal::from(i as u32 + 1));
            ids.push(repository.start_update(p).await.unwrap());
        }
        db.fail_current_rate_writes(&pairs[2]).await.unwrap();

        let worker = worker(&db, source, 10);
        let err = worker.execute_update().await.unwrap_err();
        assert_eq!(err.processed, 2);
        assert!(matches!(err.source, RateKeeperError::DatabaseError(_)));

        assert_eq!(ledger.get(ids[0]).await.unwrap().status, UpdateStatus::Done);
        assert_eq!(ledger.get(ids[1]).await.unwrap().status, UpdateStatus::Done);
        assert_eq!(ledger.get(ids[2]).await.unwrap().status, UpdateStatus::Updating);
        assert!(repository.get_last_rate(&pairs[2]).await.unwrap().is_empty());

        let pending = repository.pending_updates(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, ids[2]);
        assert_eq!(worker.metrics().snapshot().storage_failures, 1);
    }

    #[tokio::test]
    async fn test_error_write_failure_aborts_batch() {
        let db = TestDatabase::new().await.unwrap();
        let repository = Repository::new(db.pool.clone());
        let ledger = UpdateLedger::new(db.pool.clone());

        let usd_mxn = pair(Currency::usd(), Currency::mxn());
        let usd_eur = pair(Currency::usd(), Currency::eur());
        let usd_gbp = pair(Currency::usd(), Currency::gbp());

        let source = Arc::new(MockRateSource::new());
        source.set_rate(usd_mxn.clone(), dec!(17.10));
        source.fail_pair(usd_eur.clone(), "upstream timeout");
        source.set_rate(usd_gbp.clone(), dec!(0.79));

        let mxn_id = repository.start_update(&usd_mxn).await.unwrap();
        let eur_id = repository.start_update(&usd_eur).await.unwrap();
        let gbp_id = repository.start_update(&usd_gbp).await.unwrap();
        db.fail_update_error_writes().await.unwrap();

        let worker = worker(&db, source, 10);
        let err = worker.execute_update().await.unwrap_err();
        assert_eq!(err.processed, 1);
        assert!(matches!(err.source, RateKeeperError::DatabaseError(_)));

        assert_eq!(ledger.get(mxn_id).await.unwrap().status, UpdateStatus::Done);
        assert_eq!(ledger.get(eur_id).await.unwrap().status, UpdateStatus::Updating);
        assert_eq!(ledger.get(gbp_id).await.unwrap().status, UpdateStatus::Updating);

        let snapshot = worker.metrics().snapshot();
        assert_eq!(snapshot.resolved, 1);
        assert_eq!(snapshot.provider_failures, 1);
        assert_eq!(snapshot.storage_failures, 1);
        assert_eq!(snapshot.skipped, 0);
    }

    #[tokio::test]
    async fn test_empty_ledger_processes_nothing() {
        let db = TestDatabase::new().await.unwrap();
        let worker = worker(&db, Arc::new(MockRateSource::new()), 10);

        assert_eq!(worker.execute_update().await.unwrap(), 0);
        assert_eq!(worker.metrics().snapshot().ticks, 1);
    }

    /// Resolves the row itself before answering, like a second worker
    /// finishing first.
    struct RacingSource {
        repository: Repository,
        rate: Decimal,
    }

    #[async_trait]
    impl RateSource for RacingSource {
        fn name(&self) -> &str {
            "racing"
        }

        async fn get_rate(&self, pair: &CurrencyPair) -> FxResult<Decimal> {
            for update in self.repository.pending_updates(10).await.unwrap() {
                if &update.pair == pair {
                    self.repository.resolve(update.id, pair, self.rate).await.unwrap();
                }
            }
            Ok(self.rate)
        }
    }

    #[tokio::test]
    async fn test_already_resolved_row_is_skipped() {
        let db = TestDatabase::new().await.unwrap();
        let repository = Repository::new(db.pool.clone());
        let usd_eur = pair(Currency::usd(), Currency::eur());
        let id = repository.start_update(&usd_eur).await.unwrap();

        let source = Arc::new(RacingSource {
            repository: repository.clone(),
            rate: dec!(0.93),
        });
        let worker = worker(&db, source, 10);

        assert_eq!(worker.execute_update().await.unwrap(), 0);
        assert_eq!(worker.metrics().snapshot().skipped, 1);
        assert_eq!(repository.get_update(id).await.unwrap().rate, Some(dec!(0.93)));
    }

    #[tokio::test]
    async fn test_run_drains_backlog_then_stops() {
        let db = TestDatabase::new().await.unwrap();
        let repository = Repository::new(db.pool.clone());

        let source = Arc::new(MockRateSource::new());
        let pairs = [
            pair(Currency::usd(), Currency::eur()),
            pair(Currency::eur(), Currency::usd()),
            pair(Currency::usd(), Currency::mxn()),
        ];
        for p in &pairs {
            source.set_rate(p.clone(), dec!(1.5));
            repository.start_update(p).await.unwrap();
        }

        // One row per tick and a timer that never fires again: only the
        // immediate re-tick can finish the backlog.
        let worker = worker(&db, source, 1);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run(shutdown_rx).await }
        });

        tokio::time::timeout(Duration::from_secs(10), async {
            while !repository.pending_updates(10).await.unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        shutdown_tx.send(()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(worker.state(), WorkerState::Stopped);
        assert_eq!(worker.metrics().snapshot().resolved, 3);
        for p in &pairs {
            assert_eq!(repository.get_last_rate(p).await.unwrap().rate, Some(dec!(1.5)));
        }
    }
}
