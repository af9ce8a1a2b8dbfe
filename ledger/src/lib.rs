//! Ratekeeper Ledger
//!
//! Durable state for rate updates: the update ledger, the current rate
//! snapshot, and the repository that keeps the two consistent.

pub mod db;
pub mod updates;
pub mod current_rate;
pub mod repository;

pub use current_rate::CurrentRateStore;
pub use db::{create_db_pool, migrate};
pub use repository::Repository;
pub use updates::UpdateLedger;

#[cfg(feature = "test-utils")]
pub use db::TestDatabase;
