//! Time utilities.

use chrono::{DateTime, SubsecRound, Utc};

/// A timestamp with timezone (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp, truncated to microseconds so that it
/// survives a round trip through the database unchanged.
pub fn now() -> Timestamp {
    Utc::now().trunc_subsecs(6)
}
