//! Error types for Ratekeeper.

use crate::{Currency, CurrencyPair, UpdateStatus};
use thiserror::Error;

/// Main error type for Ratekeeper operations.
#[derive(Error, Debug)]
pub enum RateKeeperError {
    /// Malformed currency code.
    #[error("Invalid currency code: {0:?}")]
    InvalidCurrency(String),

    /// Well-formed code that the service does not handle.
    #[error("Currency {0} not supported")]
    UnsupportedCurrency(Currency),

    /// Both sides of the pair are the same currency.
    #[error("Trying to convert same currency: {0}")]
    IdenticalPair(CurrencyPair),

    /// No update with this id.
    #[error("Update not found: {0}")]
    UpdateNotFound(String),

    /// Update is already in a terminal state.
    #[error("Invalid transition for update {id} from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: UpdateStatus,
        to: UpdateStatus,
    },

    /// Database error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl RateKeeperError {
    /// Check if the error means the requested entity does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RateKeeperError::UpdateNotFound(_))
    }

    /// Check if the caller sent input the service rejects.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RateKeeperError::InvalidCurrency(_)
                | RateKeeperError::UnsupportedCurrency(_)
                | RateKeeperError::IdenticalPair(_)
        )
    }

    /// Get a stable error code for API responses and logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            RateKeeperError::InvalidCurrency(_) => "INVALID_CURRENCY",
            RateKeeperError::UnsupportedCurrency(_) => "UNSUPPORTED_CURRENCY",
            RateKeeperError::IdenticalPair(_) => "IDENTICAL_PAIR",
            RateKeeperError::UpdateNotFound(_) => "UPDATE_NOT_FOUND",
            RateKeeperError::InvalidTransition { .. } => "INVALID_TRANSITION",
            RateKeeperError::DatabaseError(_) => "DATABASE_ERROR",
            RateKeeperError::ConfigurationError(_) => "CONFIGURATION_ERROR",
            RateKeeperError::InternalError(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type alias for Ratekeeper operations.
pub type Result<T> = std::result::Result<T, RateKeeperError>;
