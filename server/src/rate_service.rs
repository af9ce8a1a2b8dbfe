//! Request-facing entry point: validates input, then delegates to the
//! repository.

use std::collections::BTreeSet;

use tracing::instrument;

use ratekeeper_common::{
    Currency, CurrencyPair, RateKeeperError, RateReading, Result, UpdateId,
};
use ratekeeper_ledger::Repository;

/// Validating front of the repository used by the HTTP API.
#[derive(Debug, Clone)]
pub struct RateService {
    repository: Repository,
    supported: BTreeSet<Currency>,
}

impl RateService {
    pub fn new(repository: Repository, supported: impl IntoIterator<Item = Currency>) -> Self {
        Self {
            repository,
            supported: supported.into_iter().collect(),
        }
    }

    /// Start (or join) an update for `from`/`to`. Returns immediately.
    #[instrument(skip(self))]
    pub async fn start_update(&self, from: &str, to: &str) -> Result<UpdateId> {
        let pair = self.pair(from, to)?;
        self.repository.start_update(&pair).await
    }

    /// Reading for an update id. Ids that don't parse are unknown.
    pub async fn get_update(&self, id: &str) -> Result<RateReading> {
        let id = UpdateId::parse(id.trim())
            .map_err(|_| RateKeeperError::UpdateNotFound(id.to_string()))?;
        self.repository.get_update(id).await
    }

    /// Latest resolved rate for `from`/`to`.
    pub async fn get_last_rate(&self, from: &str, to: &str) -> Result<RateReading> {
        let pair = self.pair(from, to)?;
        self.repository.get_last_rate(&pair).await
    }

    /// Database round trip for health checks.
    pub async fn ping(&self) -> Result<()> {
        self.repository.ping().await
    }

    fn pair(&self, from: &str, to: &str) -> Result<CurrencyPair> {
        let from = self.currency(from)?;
        let to = self.currency(to)?;

        let pair = CurrencyPair::new(from, to);
        if pair.is_identity() {
            return Err(RateKeeperError::IdenticalPair(pair));
        }
        Ok(pair)
    }

    fn currency(&self, code: &str) -> Result<Currency> {
        let currency = Currency::parse(code)?;
        if !self.supported.contains(&currency) {
            return Err(RateKeeperError::UnsupportedCurrency(currency));
        }
        Ok(currency)
    }
}
