//! Ratekeeper Common Types
//!
//! Shared types for the Ratekeeper exchange-rate service: currency pairs,
//! update identifiers, the update status state machine and error types.

pub mod currency;
pub mod identifiers;
pub mod update;
pub mod error;
pub mod time;

pub use currency::*;
pub use identifiers::*;
pub use update::*;
pub use error::*;
pub use time::*;
