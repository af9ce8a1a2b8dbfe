//! Ratekeeper FX
//!
//! Exchange rate sources consulted by the update worker.
//!
//! # Example
//!
//! ```rust,ignore
//! use ratekeeper_fx::{build_rate_source, RateSourceConfig};
//! use ratekeeper_common::{Currency, CurrencyPair};
//!
//! let source = build_rate_source(&RateSourceConfig::Static("USD/EUR=0.92".into()))?;
//! let rate = source
//!     .get_rate(&CurrencyPair::new(Currency::usd(), Currency::eur()))
//!     .await?;
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod provider;

pub use config::{build_rate_source, RateSourceConfig};
pub use error::{FxError, FxResult};
pub use http::{HttpRateSource, HttpSourceConfig};
pub use provider::{RateSource, StaticRateSource};

#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockRateSource;
