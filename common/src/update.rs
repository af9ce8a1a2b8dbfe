//! Rate update records and their status state machine.

use crate::{CurrencyPair, Timestamp, UpdateId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a rate update attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateStatus {
    /// Waiting for the worker to fetch a rate.
    Updating,
    /// Resolved with a rate.
    Done,
    /// The rate source failed for this attempt.
    Error,
}

impl UpdateStatus {
    /// Get valid next states from current state.
    pub fn valid_transitions(&self) -> &[UpdateStatus] {
        match self {
            UpdateStatus::Updating => &[UpdateStatus::Done, UpdateStatus::Error],
            UpdateStatus::Done => &[],
            UpdateStatus::Error => &[],
        }
    }

    /// Check if transition to given state is valid.
    pub fn can_transition_to(&self, next: UpdateStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateStatus::Updating => "UPDATING",
            UpdateStatus::Done => "DONE",
            UpdateStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UPDATING" => Ok(UpdateStatus::Updating),
            "DONE" => Ok(UpdateStatus::Done),
            "ERROR" => Ok(UpdateStatus::Error),
            other => Err(format!("unknown update status: {}", other)),
        }
    }
}

/// One attempt to refresh the rate of a currency pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRateUpdate {
    pub id: UpdateId,
    pub pair: CurrencyPair,
    pub status: UpdateStatus,
    /// Set only when `status` is `Done`.
    pub rate: Option<Decimal>,
    /// Set only when `status` is `Done`.
    pub resolved_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl ExchangeRateUpdate {
    /// Rate and time as seen by clients; empty unless the update is done.
    pub fn reading(&self) -> RateReading {
        match (self.status, self.rate, self.resolved_at) {
            (UpdateStatus::Done, Some(rate), Some(at)) => RateReading::resolved(rate, at),
            _ => RateReading::empty(),
        }
    }
}

/// A pending update handed to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdate {
    pub id: UpdateId,
    pub pair: CurrencyPair,
}

/// Latest successfully resolved rate for a pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentRate {
    pub pair: CurrencyPair,
    pub rate: Decimal,
    pub resolved_at: Timestamp,
}

/// What a client observes: either both fields or neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RateReading {
    pub rate: Option<Decimal>,
    pub resolved_at: Option<Timestamp>,
}

impl RateReading {
    /// No value yet.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn resolved(rate: Decimal, resolved_at: Timestamp) -> Self {
        Self {
            rate: Some(rate),
            resolved_at: Some(resolved_at),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rate.is_none()
    }
}

impl From<CurrentRate> for RateReading {
    fn from(current: CurrentRate) -> Self {
        Self::resolved(current.rate, current.resolved_at)
    }
}
