//! Rate source error types.

use ratekeeper_common::CurrencyPair;
use thiserror::Error;

/// Errors a rate source can report. The worker records any of these as a
/// failed update.
#[derive(Debug, Error)]
pub enum FxError {
    /// The source has no rate for the requested pair.
    #[error("Rate not available for {0}")]
    RateNotAvailable(CurrencyPair),

    /// The source answered with an error.
    #[error("Rate provider error: {0}")]
    ProviderError(String),

    /// Request never completed (connect, timeout, TLS).
    #[error("Rate provider transport error: {0}")]
    Transport(String),

    /// Response body did not have the expected shape.
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    /// Value found is not a usable rate.
    #[error("Invalid rate {value:?} for {pair}")]
    InvalidRate { pair: CurrencyPair, value: String },

    /// Source could not be built from its configuration.
    #[error("Rate source configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for FxError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FxError::InvalidResponse(e.to_string())
        } else {
            FxError::Transport(e.to_string())
        }
    }
}

/// Result type for rate source operations.
pub type FxResult<T> = Result<T, FxError>;
