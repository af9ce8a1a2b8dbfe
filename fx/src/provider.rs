//! Rate source trait and in-process implementations.

use async_trait::async_trait;
use dashmap::DashMap;
use ratekeeper_common::CurrencyPair;
use rust_decimal::Decimal;
use tracing::debug;

use crate::error::{FxError, FxResult};

/// Something that can price one unit of `pair.from` in `pair.to`.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Get the source name, used in logs.
    fn name(&self) -> &str;

    /// Fetch the current rate for a currency pair.
    async fn get_rate(&self, pair: &CurrencyPair) -> FxResult<Decimal>;
}

/// Fixed table of rates, configured at startup.
#[derive(Debug, Default)]
pub struct StaticRateSource {
    rates: DashMap<CurrencyPair, Decimal>,
}

impl StaticRateSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `FROM/TO=rate,...` table. Blank entries are ignored.
    pub fn parse_table(table: &str) -> FxResult<Self> {
        let source = Self::new();
        for entry in table.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (pair, rate) = entry.split_once('=').ok_or_else(|| {
                FxError::Configuration(format!("expected FROM/TO=rate, got {:?}", entry))
            })?;
            let pair: CurrencyPair = pair
                .trim()
                .parse()
                .map_err(|e| FxError::Configuration(format!("{}: {}", entry, e)))?;
            let rate = parse_decimal(&pair, rate.trim())?;
            source.set_rate(pair, rate);
        }
        Ok(source)
    }

    /// Set the rate for a pair, replacing any previous value.
    pub fn set_rate(&self, pair: CurrencyPair, rate: Decimal) {
        self.rates.insert(pair, rate);
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

#[async_trait]
impl RateSource for StaticRateSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn get_rate(&self, pair: &CurrencyPair) -> FxResult<Decimal> {
        let rate = self
            .rates
            .get(pair)
            .map(|r| *r)
            .ok_or_else(|| FxError::RateNotAvailable(pair.clone()))?;
        debug!(pair = %pair, rate = %rate, "Static rate");
        Ok(rate)
    }
}

/// Parse a rate exactly. Accepts plain and scientific notation; the result
/// must be strictly positive.
pub(crate) fn parse_decimal(pair: &CurrencyPair, raw: &str) -> FxResult<Decimal> {
    let invalid = || FxError::InvalidRate {
        pair: pair.clone(),
        value: raw.to_string(),
    };

    let rate = Decimal::from_str_exact(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map_err(|_| invalid())?;

    if rate <= Decimal::ZERO {
        return Err(invalid());
    }
    Ok(rate)
}

/// Mock rate source for testing. Pairs without a rate fail with
/// `RateNotAvailable`; pairs marked failing fail with `ProviderError`.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default)]
pub struct MockRateSource {
    rates: DashMap<CurrencyPair, Decimal>,
    failing: DashMap<CurrencyPair, String>,
    calls: std::sync::atomic::AtomicUsize,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockRateSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_rate(&self, pair: CurrencyPair, rate: Decimal) {
        self.rates.insert(pair, rate);
    }

    /// Make every request for `pair` fail.
    pub fn fail_pair(&self, pair: CurrencyPair, message: impl Into<String>) {
        self.failing.insert(pair, message.into());
    }

    /// Number of `get_rate` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl RateSource for MockRateSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn get_rate(&self, pair: &CurrencyPair) -> FxResult<Decimal> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        if let Some(message) = self.failing.get(pair) {
            return Err(FxError::ProviderError(message.clone()));
        }
        self.rates
            .get(pair)
            .map(|r| *r)
            .ok_or_else(|| FxError::RateNotAvailable(pair.clone()))
    }
}
